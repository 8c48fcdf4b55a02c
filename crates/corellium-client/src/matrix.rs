use corellium::assessment::{Assessment, CreateAssessment, ReportFormat};
use corellium::image::{Image, ImageUpload};
use corellium::instance::{Input, Instance};

use tracing::info;

use crate::error::Result;
use crate::images::Images;
use crate::instances::Instances;
use crate::transport::{Transport, join_path};
use crate::workflow::{AssessmentBackend, Coordinator, RunAssessment, WorkflowSettings};

/// Security assessments of the applications running in an instance.
#[derive(Debug, Clone)]
pub struct Matrix {
    transport: Transport,
    instances: Instances,
    images: Images,
    root: String,
    instance_id: String,
    settings: WorkflowSettings,
}

impl Matrix {
    pub(crate) fn new(
        transport: Transport,
        instances: Instances,
        images: Images,
        matrix_root: &str,
        instance_id: String,
    ) -> Self {
        Self {
            transport,
            instances,
            images,
            root: matrix_root.into(),
            instance_id,
            settings: WorkflowSettings::new(),
        }
    }

    /// Sets the [`WorkflowSettings`] used by [`Matrix::run`].
    #[must_use]
    pub fn settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    fn assessments_path(&self) -> String {
        join_path(&self.root, &format!("{}/assessments", self.instance_id))
    }

    fn assessment_path(&self, id: &str) -> String {
        join_path(&self.assessments_path(), id)
    }

    fn action_path(&self, id: &str, action: &str) -> String {
        join_path(&self.assessment_path(id), action)
    }

    /// Runs an assessment from creation to completion.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::run`].
    pub async fn run(&self, request: RunAssessment) -> Result<Assessment> {
        Coordinator::new(self.clone())
            .settings(self.settings.clone())
            .run(request)
            .await
    }

    /// Creates an assessment.
    ///
    /// An empty answer yields an assessment without identifier nor status.
    ///
    /// # Errors
    ///
    /// Fails when the assessment cannot be created.
    pub async fn create_assessment(&self, body: &CreateAssessment) -> Result<Assessment> {
        let assessment: Option<Assessment> =
            self.transport.post(&self.assessments_path(), body).await?;
        Ok(assessment.unwrap_or_default())
    }

    /// Retrieves an assessment.
    ///
    /// # Errors
    ///
    /// Fails when the assessment does not exist or cannot be retrieved.
    pub async fn assessment(&self, id: &str) -> Result<Assessment> {
        self.transport.get(&self.assessment_path(id)).await
    }

    /// Lists the assessments of the instance.
    ///
    /// # Errors
    ///
    /// Fails when the list cannot be retrieved.
    pub async fn assessments(&self) -> Result<Vec<Assessment>> {
        let path = join_path(
            &self.root,
            &format!("{0}/instances/{0}/assessments", self.instance_id),
        );
        self.transport.get(&path).await
    }

    /// Deletes an assessment.
    ///
    /// # Errors
    ///
    /// Fails when the assessment does not exist or cannot be deleted.
    pub async fn delete_assessment(&self, id: &str) -> Result<()> {
        info!("Deleting assessment {id}");
        self.transport.delete(&self.assessment_path(id)).await
    }

    /// Starts monitoring the assessed application.
    ///
    /// # Errors
    ///
    /// Fails when the assessment is not `new`.
    pub async fn start_monitoring(&self, id: &str) -> Result<()> {
        self.transport.post_empty(&self.action_path(id, "start")).await
    }

    /// Stops monitoring the assessed application.
    ///
    /// # Errors
    ///
    /// Fails when the assessment is not `monitoring`.
    pub async fn stop_monitoring(&self, id: &str) -> Result<()> {
        self.transport.post_empty(&self.action_path(id, "stop")).await
    }

    /// Runs the checks over what has been monitored.
    ///
    /// # Errors
    ///
    /// Fails when the assessment is not `readyForTesting`.
    pub async fn run_checks(&self, id: &str) -> Result<()> {
        self.transport.post_empty(&self.action_path(id, "test")).await
    }

    /// Downloads the report of an assessment in the given format.
    ///
    /// # Errors
    ///
    /// Fails when the report cannot be downloaded.
    pub async fn download_report(&self, id: &str, format: ReportFormat) -> Result<String> {
        self.transport
            .get_text(
                &self.action_path(id, "download"),
                &[("format", format.name())],
            )
            .await
    }

    /// Downloads the JSON report of an assessment and parses it.
    ///
    /// # Errors
    ///
    /// Fails when the report cannot be downloaded or parsed.
    pub async fn report(&self, id: &str) -> Result<Assessment> {
        let report = self.download_report(id, ReportFormat::Json).await?;
        Ok(serde_json::from_str(&report)?)
    }
}

impl AssessmentBackend for Matrix {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn instance(&self) -> Result<Instance> {
        self.instances.get(&self.instance_id).await
    }

    async fn upload_wordlist(&self, upload: ImageUpload) -> Result<Image> {
        self.images.upload(upload).await
    }

    async fn create_assessment(&self, body: CreateAssessment) -> Result<Assessment> {
        Self::create_assessment(self, &body).await
    }

    async fn assessment(&self, id: &str) -> Result<Assessment> {
        Self::assessment(self, id).await
    }

    async fn start_monitoring(&self, id: &str) -> Result<()> {
        Self::start_monitoring(self, id).await
    }

    async fn stop_monitoring(&self, id: &str) -> Result<()> {
        Self::stop_monitoring(self, id).await
    }

    async fn run_checks(&self, id: &str) -> Result<()> {
        Self::run_checks(self, id).await
    }

    async fn input(&self, input: &Input) -> Result<()> {
        self.instances.input(&self.instance_id, input).await
    }
}
