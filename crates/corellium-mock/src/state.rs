use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use corellium::assessment::{Assessment, AssessmentStatus, CreateAssessment};
use corellium::command::Command;
use corellium::image::Image;
use corellium::instance::{Instance, InstanceState};

use tokio::sync::Mutex;

use tracing::debug;

/// How the agent of an instance answers a command.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentBehavior {
    /// Answers with `{"id": <id>, "result": "ok"}` in a text frame.
    Echo,
    /// Answers with `{"id": <id>, "result": "ok"}` in a binary frame.
    EchoBinary,
    /// Answers with `{"id": <id>, "error": {"message": <message>}}`.
    Fail(String),
    /// Answers first with a different identifier, then like [`Self::Echo`].
    ForeignIdFirst,
    /// Closes the connection with the given code without answering.
    Close(u16),
    /// Answers with a frame that is not JSON.
    Malformed,
    /// Never answers.
    Silent,
}

/// How a creation request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationAnswer {
    /// With the created record.
    #[default]
    Record,
    /// With an empty JSON object.
    EmptyObject,
    /// With an empty body.
    EmptyBody,
}

#[derive(Debug, Clone)]
struct MockInstance {
    instance: Instance,
    behavior: AgentBehavior,
    // Number of reads still reporting the instance as booting.
    boot_reads: u32,
}

#[derive(Debug, Clone)]
struct MockAssessment {
    assessment: Assessment,
    // Statuses applied, one per read.
    steps: VecDeque<AssessmentStatus>,
}

/// An uploaded image along with its content.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    /// The image record.
    pub image: Image,
    /// Project the image was uploaded to.
    pub project: Option<String>,
    /// Instance the image was attached to.
    pub instance: Option<String>,
    /// Encoding of the image.
    pub encoding: Option<String>,
    /// Image content.
    pub file: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    instances: HashMap<String, MockInstance>,
    images: HashMap<String, StoredImage>,
    assessments: HashMap<String, MockAssessment>,
    fail_at: Option<AssessmentStatus>,
    assessment_answer: CreationAnswer,
    image_answer: CreationAnswer,
    calls: Vec<String>,
    commands: Vec<Command>,
    agent_connections: usize,
    agent_closes: usize,
    counter: u64,
}

/// The in-memory state of the mock.
///
/// Cloning a [`MockState`] returns another handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct MockState(Arc<Mutex<Inner>>);

/// A [`MockState`] builder.
#[derive(Debug, Default)]
pub struct MockApi(Inner);

impl MockApi {
    /// Creates an empty [`MockApi`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an [`Instance`] whose agent answers according to the given
    /// [`AgentBehavior`].
    #[must_use]
    pub fn instance(mut self, instance: Instance, behavior: AgentBehavior) -> Self {
        self.0.instances.insert(
            instance.id.clone(),
            MockInstance {
                instance,
                behavior,
                boot_reads: 0,
            },
        );
        self
    }

    /// Reports the given instance as booting for the next `reads` reads,
    /// then as powered on.
    #[must_use]
    pub fn booting(mut self, instance_id: &str, reads: u32) -> Self {
        if let Some(mock) = self.0.instances.get_mut(instance_id) {
            mock.boot_reads = reads;
            if reads > 0 {
                mock.instance.state = InstanceState::Booting;
            }
        }
        self
    }

    /// Makes assessments fail instead of reaching the given status.
    #[must_use]
    pub const fn fail_assessments_at(mut self, status: AssessmentStatus) -> Self {
        self.0.fail_at = Some(status);
        self
    }

    /// Sets how assessment creations are answered.
    ///
    /// The assessment is created anyway.
    #[must_use]
    pub const fn assessment_creations(mut self, answer: CreationAnswer) -> Self {
        self.0.assessment_answer = answer;
        self
    }

    /// Sets how image uploads are answered.
    ///
    /// The image is stored anyway.
    #[must_use]
    pub const fn image_creations(mut self, answer: CreationAnswer) -> Self {
        self.0.image_answer = answer;
        self
    }

    /// Builds the shared [`MockState`].
    #[must_use]
    pub fn build(self) -> MockState {
        MockState(Arc::new(Mutex::new(self.0)))
    }
}

impl MockState {
    /// Returns all requests received so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.0.lock().await.calls.clone()
    }

    /// Returns all commands received by the agents so far, in order.
    pub async fn commands(&self) -> Vec<Command> {
        self.0.lock().await.commands.clone()
    }

    /// Returns the number of accepted agent connections.
    pub async fn agent_connections(&self) -> usize {
        self.0.lock().await.agent_connections
    }

    /// Returns the number of agent connections closed by clients.
    pub async fn agent_closes(&self) -> usize {
        self.0.lock().await.agent_closes
    }

    /// Waits until clients have closed the given number of agent
    /// connections, giving up after `timeout`.
    ///
    /// Returns the number of closed connections observed last.
    pub async fn wait_for_agent_closes(&self, expected: usize, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let closes = self.agent_closes().await;
            if closes >= expected || tokio::time::Instant::now() >= deadline {
                return closes;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Returns all the uploaded images.
    pub async fn images(&self) -> Vec<StoredImage> {
        self.0.lock().await.images.values().cloned().collect()
    }

    pub(crate) async fn record(&self, call: impl Into<String>) {
        let call = call.into();
        debug!("Mock call: {call}");
        self.0.lock().await.calls.push(call);
    }

    pub(crate) async fn instance(&self, id: &str) -> Option<Instance> {
        let mut inner = self.0.lock().await;
        let mock = inner.instances.get_mut(id)?;
        if mock.boot_reads > 0 {
            mock.boot_reads -= 1;
            if mock.boot_reads == 0 {
                mock.instance.state = InstanceState::On;
            }
            // The read that completes the boot still observes it booting.
            let mut instance = mock.instance.clone();
            instance.state = InstanceState::Booting;
            return Some(instance);
        }
        Some(mock.instance.clone())
    }

    pub(crate) async fn instances(&self, name: Option<&str>) -> Vec<Instance> {
        let inner = self.0.lock().await;
        let mut instances: Vec<Instance> = inner
            .instances
            .values()
            .map(|mock| mock.instance.clone())
            .filter(|instance| name.is_none_or(|name| instance.name.as_deref() == Some(name)))
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    pub(crate) async fn set_instance_state(&self, id: &str, state: InstanceState) -> bool {
        let mut inner = self.0.lock().await;
        match inner.instances.get_mut(id) {
            Some(mock) => {
                mock.instance.state = state;
                mock.boot_reads = 0;
                true
            }
            None => false,
        }
    }

    pub(crate) async fn agent_behavior(&self, info: &str) -> Option<AgentBehavior> {
        let inner = self.0.lock().await;
        inner
            .instances
            .values()
            .find(|mock| mock.instance.agent_address() == Some(info))
            .map(|mock| mock.behavior.clone())
    }

    pub(crate) async fn agent_connected(&self, info: &str, command: Option<Command>) {
        let mut inner = self.0.lock().await;
        inner.agent_connections += 1;
        inner.calls.push(format!("AGENT connect {info}"));
        if let Some(command) = command {
            inner.commands.push(command);
        }
    }

    pub(crate) async fn agent_closed(&self, info: &str) {
        let mut inner = self.0.lock().await;
        inner.agent_closes += 1;
        inner.calls.push(format!("AGENT close {info}"));
    }

    pub(crate) async fn store_image(&self, mut stored: StoredImage) -> (Image, CreationAnswer) {
        let mut inner = self.0.lock().await;
        inner.counter += 1;
        let id = format!("image-{}", inner.counter);
        stored.image.id = Some(id.clone());
        let image = stored.image.clone();
        inner.images.insert(id, stored);
        (image, inner.image_answer)
    }

    pub(crate) async fn image(&self, id: &str) -> Option<Image> {
        let inner = self.0.lock().await;
        inner.images.get(id).map(|stored| stored.image.clone())
    }

    pub(crate) async fn delete_image(&self, id: &str) -> bool {
        self.0.lock().await.images.remove(id).is_some()
    }

    pub(crate) async fn create_assessment(
        &self,
        body: CreateAssessment,
    ) -> (Assessment, CreationAnswer) {
        let mut inner = self.0.lock().await;
        inner.counter += 1;
        let id = format!("assessment-{}", inner.counter);

        let mut assessment = Assessment::new(id.clone(), AssessmentStatus::New);
        assessment.bundle_id = Some(body.bundle_id);
        assessment.instance_id = Some(body.instance_id);
        assessment.wordlist_id = body.wordlist_id;

        inner.assessments.insert(
            id,
            MockAssessment {
                assessment: assessment.clone(),
                steps: VecDeque::new(),
            },
        );

        (assessment, inner.assessment_answer)
    }

    pub(crate) async fn assessment(&self, id: &str) -> Option<Assessment> {
        let mut inner = self.0.lock().await;
        let fail_at = inner.fail_at;
        let mock = inner.assessments.get_mut(id)?;

        if let Some(next) = mock.steps.pop_front() {
            if Some(next) == fail_at {
                mock.assessment.status = AssessmentStatus::Failed;
                mock.steps.clear();
            } else {
                mock.assessment.status = next;
            }
        }

        Some(mock.assessment.clone())
    }

    pub(crate) async fn assessments(&self, instance_id: &str) -> Vec<Assessment> {
        let inner = self.0.lock().await;
        let mut assessments: Vec<Assessment> = inner
            .assessments
            .values()
            .filter(|mock| mock.assessment.instance_id.as_deref() == Some(instance_id))
            .map(|mock| mock.assessment.clone())
            .collect();
        assessments.sort_by(|a, b| a.id.cmp(&b.id));
        assessments
    }

    pub(crate) async fn delete_assessment(&self, id: &str) -> bool {
        self.0.lock().await.assessments.remove(id).is_some()
    }

    // Moves an assessment out of `from` into a transient status, queuing
    // the reads needed to settle on the next stable one.
    pub(crate) async fn advance_assessment(
        &self,
        id: &str,
        from: AssessmentStatus,
        transient: AssessmentStatus,
        settled: &[AssessmentStatus],
    ) -> Result<(), Transition> {
        let mut inner = self.0.lock().await;
        let mock = inner.assessments.get_mut(id).ok_or(Transition::NotFound)?;

        if mock.assessment.status != from || !mock.steps.is_empty() {
            return Err(Transition::WrongStatus(mock.assessment.status));
        }

        mock.assessment.status = transient;
        mock.steps.push_back(transient);
        mock.steps.extend(settled.iter().copied());
        Ok(())
    }
}

/// Why an assessment transition was refused.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Transition {
    NotFound,
    WrongStatus(AssessmentStatus),
}

#[cfg(test)]
mod tests {
    use corellium::assessment::{AssessmentStatus, CreateAssessment};
    use corellium::instance::{Instance, InstanceState};

    use super::{AgentBehavior, CreationAnswer, MockApi, Transition};

    fn create_body() -> CreateAssessment {
        CreateAssessment {
            bundle_id: "com.example.cafe".into(),
            instance_id: "instance-1".into(),
            wordlist_id: None,
        }
    }

    #[tokio::test]
    async fn booting_instance() {
        let state = MockApi::new()
            .instance(
                Instance::new("instance-1", InstanceState::Off),
                AgentBehavior::Echo,
            )
            .booting("instance-1", 2)
            .build();

        let states = [
            state.instance("instance-1").await.unwrap().state,
            state.instance("instance-1").await.unwrap().state,
            state.instance("instance-1").await.unwrap().state,
        ];

        assert_eq!(
            states,
            [
                InstanceState::Booting,
                InstanceState::Booting,
                InstanceState::On
            ]
        );
    }

    #[tokio::test]
    async fn assessment_progression() {
        let state = MockApi::new().build();

        let id = state.create_assessment(create_body()).await.0.id.unwrap();

        state
            .advance_assessment(
                &id,
                AssessmentStatus::New,
                AssessmentStatus::StartingMonitoring,
                &[AssessmentStatus::Monitoring],
            )
            .await
            .unwrap();

        // A second request while transitioning is refused.
        assert_eq!(
            state
                .advance_assessment(
                    &id,
                    AssessmentStatus::New,
                    AssessmentStatus::StartingMonitoring,
                    &[AssessmentStatus::Monitoring],
                )
                .await,
            Err(Transition::WrongStatus(AssessmentStatus::StartingMonitoring))
        );

        let first = state.assessment(&id).await.unwrap().status;
        let second = state.assessment(&id).await.unwrap().status;
        let third = state.assessment(&id).await.unwrap().status;

        assert_eq!(first, AssessmentStatus::StartingMonitoring);
        assert_eq!(second, AssessmentStatus::Monitoring);
        assert_eq!(third, AssessmentStatus::Monitoring);
    }

    #[tokio::test]
    async fn injected_failure() {
        let state = MockApi::new()
            .fail_assessments_at(AssessmentStatus::Monitoring)
            .build();

        let id = state.create_assessment(create_body()).await.0.id.unwrap();
        state
            .advance_assessment(
                &id,
                AssessmentStatus::New,
                AssessmentStatus::StartingMonitoring,
                &[AssessmentStatus::Monitoring],
            )
            .await
            .unwrap();

        state.assessment(&id).await.unwrap();
        assert_eq!(
            state.assessment(&id).await.unwrap().status,
            AssessmentStatus::Failed
        );
    }

    #[tokio::test]
    async fn creation_answers() {
        let state = MockApi::new()
            .assessment_creations(CreationAnswer::EmptyObject)
            .build();

        let (assessment, answer) = state.create_assessment(create_body()).await;
        assert_eq!(answer, CreationAnswer::EmptyObject);
        assert_eq!(assessment.id.as_deref(), Some("assessment-1"));
        assert_eq!(state.assessments("instance-1").await.len(), 1);
    }
}
