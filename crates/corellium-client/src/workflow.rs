use std::future::Future;
use std::time::Duration;

use corellium::assessment::{Assessment, AssessmentStatus, CreateAssessment};
use corellium::image::{Image, ImageUpload};
use corellium::instance::{Input, Instance, InstanceState};

use tokio_util::sync::CancellationToken;

use tracing::info;

use crate::error::{Error, ErrorKind, Result};
use crate::poller::Poller;

// Interval between two instance reads while waiting for it to power on.
const DEFAULT_BOOT_INTERVAL: Duration = Duration::from_secs(60);

// Interval between two assessment reads.
const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(5);

// Maximum time spent in a single wait.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(2 * 60 * 60);

/// The calls an assessment run is made of.
///
/// Every call targets the instance the backend is bound to.
pub trait AssessmentBackend {
    /// Returns the identifier of the instance under assessment.
    fn instance_id(&self) -> &str;

    /// Retrieves the instance under assessment.
    fn instance(&self) -> impl Future<Output = Result<Instance>> + Send;

    /// Uploads a keywords wordlist.
    ///
    /// When the returned image carries no identifier, the assessment is
    /// created without a wordlist.
    fn upload_wordlist(&self, upload: ImageUpload) -> impl Future<Output = Result<Image>> + Send;

    /// Creates an assessment.
    fn create_assessment(
        &self,
        body: CreateAssessment,
    ) -> impl Future<Output = Result<Assessment>> + Send;

    /// Retrieves an assessment.
    fn assessment(&self, id: &str) -> impl Future<Output = Result<Assessment>> + Send;

    /// Starts monitoring the assessed application.
    fn start_monitoring(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Stops monitoring the assessed application.
    fn stop_monitoring(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Runs the checks over what has been monitored.
    fn run_checks(&self, id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Delivers input to the instance.
    fn input(&self, input: &Input) -> impl Future<Output = Result<()>> + Send;
}

/// What to do when the instance is not powered on at the start of a run.
///
/// The default is [`PowerPolicy::RequirePoweredOn`]: a run never powers on
/// nor waits for an instance unless asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPolicy {
    /// Fail right away.
    #[default]
    RequirePoweredOn,
    /// Poll the instance until it is powered on.
    WaitForPoweredOn,
}

/// Settings of an assessment run.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    power_policy: PowerPolicy,
    boot_interval: Duration,
    status_interval: Duration,
    max_attempts: Option<u32>,
    deadline: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowSettings {
    /// Creates the default [`WorkflowSettings`].
    ///
    /// The instance must already be powered on, assessments are read every
    /// 5 seconds, and every wait gives up after 2 hours.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            power_policy: PowerPolicy::RequirePoweredOn,
            boot_interval: DEFAULT_BOOT_INTERVAL,
            status_interval: DEFAULT_STATUS_INTERVAL,
            max_attempts: None,
            deadline: Some(DEFAULT_DEADLINE),
            cancellation: None,
        }
    }

    /// Sets the [`PowerPolicy`].
    #[must_use]
    pub const fn power_policy(mut self, power_policy: PowerPolicy) -> Self {
        self.power_policy = power_policy;
        self
    }

    /// Sets the interval between two instance reads while waiting for it
    /// to power on.
    #[must_use]
    pub const fn boot_interval(mut self, boot_interval: Duration) -> Self {
        self.boot_interval = boot_interval;
        self
    }

    /// Sets the interval between two assessment reads.
    #[must_use]
    pub const fn status_interval(mut self, status_interval: Duration) -> Self {
        self.status_interval = status_interval;
        self
    }

    /// Sets the maximum number of reads of every wait.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Sets the maximum duration of every wait.
    #[must_use]
    pub const fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Removes every limit from waits.
    #[must_use]
    pub const fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self.deadline = None;
        self
    }

    /// Sets a token to stop the run while it is waiting.
    #[must_use]
    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    fn poller(&self, interval: Duration, stage: String) -> Poller {
        let poller = Poller::new(interval).stage(stage);
        let poller = match self.max_attempts {
            Some(max_attempts) => poller.max_attempts(max_attempts),
            None => poller,
        };
        let poller = match self.deadline {
            Some(deadline) => poller.deadline(deadline),
            None => poller,
        };
        match &self.cancellation {
            Some(cancellation) => poller.cancellation(cancellation.clone()),
            None => poller,
        }
    }
}

/// An assessment run request.
#[derive(Debug, Clone, PartialEq)]
pub struct RunAssessment {
    bundle_id: String,
    input: Option<Input>,
    keywords: Option<Vec<String>>,
}

impl RunAssessment {
    /// Creates a [`RunAssessment`] for the application with the given
    /// bundle identifier.
    #[must_use]
    pub fn new(bundle_id: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            input: None,
            keywords: None,
        }
    }

    /// Sets the [`Input`] delivered while the application is monitored.
    #[must_use]
    pub fn input(mut self, input: Input) -> Self {
        self.input = Some(input);
        self
    }

    /// Sets the keywords searched for by the checks.
    ///
    /// They are uploaded as a wordlist before the assessment is created. An
    /// empty list uploads nothing, as if no keywords had been set.
    #[must_use]
    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }
}

/// Runs an assessment from creation to completion.
///
/// The run is strictly sequential. When a wait observes the `failed`
/// status the run stops there, and nothing already done is undone.
#[derive(Debug)]
pub struct Coordinator<B: AssessmentBackend> {
    backend: B,
    settings: WorkflowSettings,
}

impl<B: AssessmentBackend> Coordinator<B> {
    /// Creates a [`Coordinator`] with the default [`WorkflowSettings`].
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self {
            backend,
            settings: WorkflowSettings::new(),
        }
    }

    /// Sets the [`WorkflowSettings`].
    #[must_use]
    pub fn settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Runs an assessment, returning it once complete.
    ///
    /// The steps are:
    ///
    /// 1. check the instance is powered on, according to the [`PowerPolicy`]
    /// 2. upload the keywords wordlist, if any
    /// 3. create the assessment and wait for it to be `new`
    /// 4. start monitoring and wait for `monitoring`
    /// 5. deliver the input, if any
    /// 6. stop monitoring and wait for `readyForTesting`
    /// 7. run the checks and wait for `complete`
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Precondition`] when the instance is not powered on
    ///   and must be, or when no assessment identifier is returned
    /// - [`ErrorKind::Workflow`] when the assessment fails or the instance
    ///   ends in error while booting
    /// - [`ErrorKind::Timeout`] and [`ErrorKind::Cancelled`] when a wait is
    ///   bounded or cancelled
    /// - any error returned by the backend calls
    pub async fn run(&self, request: RunAssessment) -> Result<Assessment> {
        let RunAssessment {
            bundle_id,
            input,
            keywords,
        } = request;

        let instance = self.powered_on_instance().await?;

        let wordlist_id = match keywords {
            Some(keywords) if !keywords.is_empty() => {
                self.upload_wordlist(&instance, &keywords).await?
            }
            _ => None,
        };

        info!("Creating an assessment of {bundle_id}");
        let assessment = self
            .backend
            .create_assessment(CreateAssessment {
                bundle_id,
                instance_id: self.backend.instance_id().into(),
                wordlist_id,
            })
            .await?;

        let Some(id) = assessment.id.filter(|id| !id.is_empty()) else {
            return Err(Error::new(
                ErrorKind::Precondition,
                "Assessment ID not returned from API",
            ));
        };

        self.wait_for(&id, AssessmentStatus::New).await?;

        info!("Assessment {id}: starting monitoring");
        self.backend.start_monitoring(&id).await?;
        self.wait_for(&id, AssessmentStatus::Monitoring).await?;

        if let Some(input) = input {
            info!("Assessment {id}: delivering input");
            self.backend.input(&input).await?;
        }

        info!("Assessment {id}: stopping monitoring");
        self.backend.stop_monitoring(&id).await?;
        self.wait_for(&id, AssessmentStatus::ReadyForTesting).await?;

        info!("Assessment {id}: running checks");
        self.backend.run_checks(&id).await?;
        let assessment = self.wait_for(&id, AssessmentStatus::Complete).await?;

        info!("Assessment {id}: complete");
        Ok(assessment)
    }

    async fn powered_on_instance(&self) -> Result<Instance> {
        let instance_id = self.backend.instance_id();

        match self.settings.power_policy {
            PowerPolicy::RequirePoweredOn => {
                let instance = self.backend.instance().await?;
                if instance.is_on() {
                    Ok(instance)
                } else {
                    Err(Error::new(
                        ErrorKind::Precondition,
                        format!(
                            "Instance {instance_id} is {}, it must be on",
                            instance.state
                        ),
                    ))
                }
            }
            PowerPolicy::WaitForPoweredOn => {
                let backend = &self.backend;
                self.settings
                    .poller(
                        self.settings.boot_interval,
                        format!("instance {instance_id} powering on"),
                    )
                    .wait(
                        move || backend.instance(),
                        Instance::is_on,
                        |instance| instance.state == InstanceState::Error,
                    )
                    .await
            }
        }
    }

    async fn upload_wordlist(
        &self,
        instance: &Instance,
        keywords: &[String],
    ) -> Result<Option<String>> {
        info!("Uploading {} keywords", keywords.len());

        let upload = ImageUpload::wordlist(keywords).instance(instance.id.clone());
        let upload = match &instance.project {
            Some(project) => upload.project(project.clone()),
            None => upload,
        };

        let image = self.backend.upload_wordlist(upload).await?;
        Ok(image.id.filter(|id| !id.is_empty()))
    }

    async fn wait_for(&self, id: &str, target: AssessmentStatus) -> Result<Assessment> {
        let backend = &self.backend;
        self.settings
            .poller(
                self.settings.status_interval,
                format!("assessment {id} reaching {target}"),
            )
            .wait(
                move || backend.assessment(id),
                |assessment| assessment.status == target,
                |assessment| assessment.status == AssessmentStatus::Failed,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use corellium::assessment::{Assessment, AssessmentStatus, CreateAssessment};
    use corellium::image::{Image, ImageUpload};
    use corellium::instance::{Input, Instance, InstanceState};

    use serde_json::{Map, json};

    use tokio_util::sync::CancellationToken;

    use crate::error::{ErrorKind, Result};

    use super::{AssessmentBackend, Coordinator, PowerPolicy, RunAssessment, WorkflowSettings};

    const INSTANCE: &str = "instance-1";
    const INTERVAL: Duration = Duration::from_millis(1);

    // An in-memory backend that settles every request immediately.
    struct FakeBackend {
        instance_states: Mutex<VecDeque<InstanceState>>,
        status: Mutex<AssessmentStatus>,
        fail_at: Option<AssessmentStatus>,
        omit_id: bool,
        omit_wordlist_id: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn new(instance_states: &[InstanceState]) -> Self {
            Self {
                instance_states: Mutex::new(instance_states.iter().copied().collect()),
                status: Mutex::new(AssessmentStatus::New),
                fail_at: None,
                omit_id: false,
                omit_wordlist_id: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn powered_on() -> Self {
            Self::new(&[InstanceState::On])
        }

        fn fail_at(mut self, status: AssessmentStatus) -> Self {
            self.fail_at = Some(status);
            self
        }

        fn omit_id(mut self) -> Self {
            self.omit_id = true;
            self
        }

        fn omit_wordlist_id(mut self) -> Self {
            self.omit_wordlist_id = true;
            self
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn settle(&self, status: AssessmentStatus) {
            let status = if Some(status) == self.fail_at {
                AssessmentStatus::Failed
            } else {
                status
            };
            *self.status.lock().unwrap() = status;
        }
    }

    impl AssessmentBackend for FakeBackend {
        fn instance_id(&self) -> &str {
            INSTANCE
        }

        async fn instance(&self) -> Result<Instance> {
            self.record("instance");
            let mut states = self.instance_states.lock().unwrap();
            let state = if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                states[0]
            };
            Ok(Instance::new(INSTANCE, state).project("project-1"))
        }

        async fn upload_wordlist(&self, upload: ImageUpload) -> Result<Image> {
            self.record(format!(
                "upload {} {}",
                upload.name,
                String::from_utf8_lossy(&upload.file)
            ));
            Ok(Image {
                id: if self.omit_wordlist_id {
                    None
                } else {
                    Some("wordlist-1".into())
                },
                name: Some(upload.name),
                kind: Some(upload.kind),
                extra: Map::new(),
            })
        }

        async fn create_assessment(&self, body: CreateAssessment) -> Result<Assessment> {
            self.record(format!(
                "create {} {} {}",
                body.bundle_id,
                body.instance_id,
                body.wordlist_id.as_deref().unwrap_or("-")
            ));
            let mut assessment = Assessment::new("assessment-1", AssessmentStatus::New);
            if self.omit_id {
                assessment.id = None;
            }
            Ok(assessment)
        }

        async fn assessment(&self, id: &str) -> Result<Assessment> {
            self.record("get");
            Ok(Assessment::new(id, *self.status.lock().unwrap()))
        }

        async fn start_monitoring(&self, _id: &str) -> Result<()> {
            self.record("start");
            self.settle(AssessmentStatus::Monitoring);
            Ok(())
        }

        async fn stop_monitoring(&self, _id: &str) -> Result<()> {
            self.record("stop");
            self.settle(AssessmentStatus::ReadyForTesting);
            Ok(())
        }

        async fn run_checks(&self, _id: &str) -> Result<()> {
            self.record("test");
            self.settle(AssessmentStatus::Complete);
            Ok(())
        }

        async fn input(&self, input: &Input) -> Result<()> {
            self.record(format!("input {}", input.0));
            Ok(())
        }
    }

    fn settings() -> WorkflowSettings {
        WorkflowSettings::new()
            .boot_interval(INTERVAL)
            .status_interval(INTERVAL)
            .max_attempts(10)
    }

    fn request() -> RunAssessment {
        RunAssessment::new("com.example.cafe")
            .input(Input::new(json!({"text": "hello"})))
            .keywords(["password", "token"])
    }

    #[tokio::test]
    async fn happy_path() {
        let coordinator = Coordinator::new(FakeBackend::powered_on()).settings(settings());

        let assessment = coordinator.run(request()).await.unwrap();

        assert_eq!(assessment.id.as_deref(), Some("assessment-1"));
        assert_eq!(assessment.status, AssessmentStatus::Complete);
        assert_eq!(
            coordinator.backend.calls(),
            [
                "instance",
                "upload keywords.txt password\ntoken",
                "create com.example.cafe instance-1 wordlist-1",
                "get",
                "start",
                "get",
                r#"input {"text":"hello"}"#,
                "stop",
                "get",
                "test",
                "get",
            ]
        );
    }

    #[tokio::test]
    async fn without_keywords_and_input() {
        let coordinator = Coordinator::new(FakeBackend::powered_on()).settings(settings());

        coordinator
            .run(RunAssessment::new("com.example.cafe").keywords(Vec::<String>::new()))
            .await
            .unwrap();

        let calls = coordinator.backend.calls();
        assert_eq!(calls[1], "create com.example.cafe instance-1 -");
        assert!(!calls.iter().any(|call| call.starts_with("upload")));
        assert!(!calls.iter().any(|call| call.starts_with("input")));
    }

    #[tokio::test]
    async fn wordlist_without_id() {
        let coordinator =
            Coordinator::new(FakeBackend::powered_on().omit_wordlist_id()).settings(settings());

        let assessment = coordinator.run(request()).await.unwrap();

        assert_eq!(assessment.status, AssessmentStatus::Complete);
        let calls = coordinator.backend.calls();
        assert_eq!(calls[1], "upload keywords.txt password\ntoken");
        assert_eq!(calls[2], "create com.example.cafe instance-1 -");
    }

    #[tokio::test]
    async fn failure_while_monitoring() {
        let coordinator = Coordinator::new(
            FakeBackend::powered_on().fail_at(AssessmentStatus::Monitoring),
        )
        .settings(settings());

        let error = coordinator.run(request()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Workflow);
        assert_eq!(
            error.description(),
            "assessment assessment-1 reaching monitoring: failure status observed"
        );

        let calls = coordinator.backend.calls();
        assert_eq!(calls.last().map(String::as_str), Some("get"));
        for step in ["input", "stop", "test"] {
            assert!(!calls.iter().any(|call| call.starts_with(step)));
        }
    }

    #[tokio::test]
    async fn failure_while_testing() {
        let coordinator = Coordinator::new(
            FakeBackend::powered_on().fail_at(AssessmentStatus::Complete),
        )
        .settings(settings());

        let error = coordinator.run(request()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Workflow);
        assert!(coordinator.backend.calls().contains(&"test".to_owned()));
    }

    #[tokio::test]
    async fn missing_assessment_id() {
        let coordinator =
            Coordinator::new(FakeBackend::powered_on().omit_id()).settings(settings());

        let error = coordinator.run(request()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Precondition);
        assert_eq!(error.description(), "Assessment ID not returned from API");
        assert!(!coordinator.backend.calls().contains(&"get".to_owned()));
    }

    #[tokio::test]
    async fn instance_powered_off() {
        let coordinator =
            Coordinator::new(FakeBackend::new(&[InstanceState::Off])).settings(settings());

        let error = coordinator.run(request()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Precondition);
        assert_eq!(
            error.description(),
            "Instance instance-1 is off, it must be on"
        );
        assert_eq!(coordinator.backend.calls(), ["instance"]);
    }

    #[tokio::test]
    async fn wait_for_powered_on() {
        let coordinator = Coordinator::new(FakeBackend::new(&[
            InstanceState::Booting,
            InstanceState::Booting,
            InstanceState::On,
        ]))
        .settings(settings().power_policy(PowerPolicy::WaitForPoweredOn));

        coordinator.run(request()).await.unwrap();

        let calls = coordinator.backend.calls();
        assert_eq!(calls[..3], ["instance", "instance", "instance"]);
        assert!(calls[3].starts_with("upload"));
    }

    #[tokio::test]
    async fn instance_error_while_booting() {
        let coordinator = Coordinator::new(FakeBackend::new(&[
            InstanceState::Booting,
            InstanceState::Error,
        ]))
        .settings(settings().power_policy(PowerPolicy::WaitForPoweredOn));

        let error = coordinator.run(request()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Workflow);
        assert_eq!(coordinator.backend.calls(), ["instance", "instance"]);
    }

    #[tokio::test]
    async fn cancelled() {
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let coordinator = Coordinator::new(FakeBackend::powered_on())
            .settings(settings().cancellation(cancellation));

        let error = coordinator.run(request()).await.unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert!(!coordinator.backend.calls().contains(&"start".to_owned()));
    }

    #[test]
    fn default_settings() {
        let settings = WorkflowSettings::default();

        assert_eq!(PowerPolicy::default(), PowerPolicy::RequirePoweredOn);
        assert_eq!(settings.power_policy, PowerPolicy::default());
        assert_eq!(settings.boot_interval, Duration::from_secs(60));
        assert_eq!(settings.status_interval, Duration::from_secs(5));
        assert_eq!(settings.max_attempts, None);
        assert_eq!(settings.deadline, Some(Duration::from_secs(7200)));

        let settings = settings.max_attempts(3).unbounded();
        assert_eq!(settings.max_attempts, None);
        assert_eq!(settings.deadline, None);
    }
}
