use std::path::Path;

use reqwest::multipart::{Form, Part};
use tracing::info;

use super::client::ApiClient;
use super::types::{
    GenerationJob, JobStatusUpdate, MessageResponse, TierStatus, University, UniversityList,
};
use crate::error::ClientError;

/// Prompt the legacy endpoints use when none is chosen.
pub const DEFAULT_PROMPT_ID: &str = "P2";

/// An input photo ready for a multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let mime = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            filename,
            bytes,
            mime,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ClientError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ClientError::InvalidInput(format!("Failed to read {:?}: {}", path, e)))?;
        if bytes.is_empty() {
            return Err(ClientError::InvalidInput(format!("{:?} is empty", path)));
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.jpg")
            .to_string();
        Ok(Self::new(filename, bytes))
    }

    fn into_part(self) -> Result<Part, ClientError> {
        Part::bytes(self.bytes)
            .file_name(self.filename)
            .mime_str(&self.mime)
            .map_err(|e| ClientError::InvalidInput(format!("Bad upload type: {}", e)))
    }
}

fn metadata_form(form: Form, university: &str, degree_level: &str) -> Form {
    form.text("university", university.to_string())
        .text("degree_level", degree_level.to_string())
}

impl ApiClient {
    pub async fn list_universities(&self) -> Result<Vec<University>, ClientError> {
        let list: UniversityList = self.get_json("generation/universities").await?;
        Ok(list.universities)
    }

    pub async fn tier_status(&self) -> Result<TierStatus, ClientError> {
        self.get_json("generation/tier-status").await
    }

    /// Submit one photo under whatever tier the account is in.
    pub async fn generate_tier(
        &self,
        file: UploadFile,
        university: &str,
        degree_level: &str,
    ) -> Result<GenerationJob, ClientError> {
        info!(
            "Submitting tier generation for {} ({}, {})",
            file.filename, university, degree_level
        );
        let form = metadata_form(Form::new().part("file", file.into_part()?), university, degree_level);
        let job: GenerationJob = self.post_multipart("generation/generate-tier", form).await?;
        Ok(job.watermark_images())
    }

    pub async fn generate_single(
        &self,
        file: UploadFile,
        university: &str,
        degree_level: &str,
        prompt_id: Option<&str>,
    ) -> Result<GenerationJob, ClientError> {
        let form = metadata_form(Form::new().part("file", file.into_part()?), university, degree_level)
            .text("prompt_id", prompt_id.unwrap_or(DEFAULT_PROMPT_ID).to_string());
        let job: GenerationJob = self.post_multipart("generation/single", form).await?;
        Ok(job.watermark_images())
    }

    pub async fn generate_batch(
        &self,
        files: Vec<UploadFile>,
        university: &str,
        degree_level: &str,
        prompt_id: Option<&str>,
    ) -> Result<GenerationJob, ClientError> {
        if files.is_empty() {
            return Err(ClientError::InvalidInput(
                "Please select at least one image".to_string(),
            ));
        }
        info!("Submitting batch of {} images", files.len());
        let mut form = Form::new();
        for file in files {
            form = form.part("files", file.into_part()?);
        }
        let form = metadata_form(form, university, degree_level)
            .text("prompt_id", prompt_id.unwrap_or(DEFAULT_PROMPT_ID).to_string());
        let job: GenerationJob = self.post_multipart("generation/batch", form).await?;
        Ok(job.watermark_images())
    }

    pub async fn list_jobs(&self, limit: u32) -> Result<Vec<GenerationJob>, ClientError> {
        let jobs: Vec<GenerationJob> = self
            .get_json_query("generation/jobs", &[("limit", limit)])
            .await?;
        Ok(jobs.into_iter().map(GenerationJob::watermark_images).collect())
    }

    pub async fn get_job(&self, job_id: i64) -> Result<GenerationJob, ClientError> {
        let job: GenerationJob = self.get_json(&format!("generation/jobs/{}", job_id)).await?;
        Ok(job.watermark_images())
    }

    pub async fn job_status(&self, job_id: i64) -> Result<JobStatusUpdate, ClientError> {
        self.get_json(&format!("generation/jobs/{}/status", job_id))
            .await
    }

    /// Re-queue a failed image. The parent job goes back to processing.
    pub async fn retry_image(&self, image_id: i64) -> Result<MessageResponse, ClientError> {
        info!("Retrying image {}", image_id);
        self.post_json(&format!("generation/retry/{}", image_id), &serde_json::json!({}))
            .await
    }

    /// Generated output. 404 until the producer has written it.
    pub async fn fetch_result(&self, image_id: i64) -> Result<Vec<u8>, ClientError> {
        self.get_bytes(&format!("generation/results/{}", image_id))
            .await
    }

    /// The photo that was uploaded for this image.
    pub async fn fetch_input(&self, image_id: i64) -> Result<Vec<u8>, ClientError> {
        self.get_bytes(&format!("generation/inputs/{}", image_id))
            .await
    }
}
