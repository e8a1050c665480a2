//! Amazon S3 Glacier backend.
//!
//! Credentials and region come from the standard AWS environment (profile,
//! env vars, instance metadata). Requests use the `-` account id, i.e. the
//! account owning the credentials.

use super::{ArchiveStore, JobOutput, JobStatus, StoreError, UploadReceipt, VaultInfo};
use crate::fs::hasher::tree_hash;
use async_trait::async_trait;
use aws_sdk_glacier::config::Region;
use aws_sdk_glacier::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_glacier::primitives::ByteStream;
use aws_sdk_glacier::types::{JobParameters, StatusCode};
use aws_sdk_glacier::Client;
use bytes::Bytes;
use tracing::{debug, info};

/// Status Glacier answers a successful UploadArchive with (201 Created).
/// The SDK output does not carry the raw status, only success.
const UPLOAD_CREATED: u16 = 201;

/// Glacier-backed archive store
pub struct GlacierStore {
    client: Client,
    account_id: String,
}

impl GlacierStore {
    /// Build a client from the AWS environment, optionally overriding the region.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }

        let sdk_config = loader.load().await;
        info!(
            "Glacier store initialized (region: {})",
            sdk_config.region().map(|r| r.as_ref()).unwrap_or("unset")
        );

        Self {
            client: Client::new(&sdk_config),
            account_id: "-".to_string(),
        }
    }
}

/// Map an SDK failure onto the store error taxonomy.
fn classify<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match err.code() {
        Some("ResourceNotFoundException") => StoreError::NotFound(detail),
        Some(_) => StoreError::Rejected(detail),
        None => StoreError::Transport(detail),
    }
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[async_trait]
impl ArchiveStore for GlacierStore {
    async fn describe_vault(&self, vault: &str) -> Result<VaultInfo, StoreError> {
        let out = self
            .client
            .describe_vault()
            .account_id(&self.account_id)
            .vault_name(vault)
            .send()
            .await
            .map_err(classify)?;

        Ok(VaultInfo {
            name: out.vault_name().unwrap_or(vault).to_string(),
            arn: out.vault_arn().unwrap_or_default().to_string(),
            created_at: out.creation_date().unwrap_or_default().to_string(),
            archive_count: non_negative(out.number_of_archives()),
            total_size_bytes: non_negative(out.size_in_bytes()),
        })
    }

    async fn upload_archive(&self, vault: &str, content: Bytes) -> Result<UploadReceipt, StoreError> {
        debug!("UploadArchive to {} ({} bytes)", vault, content.len());
        let checksum = tree_hash(&content);

        let out = self
            .client
            .upload_archive()
            .account_id(&self.account_id)
            .vault_name(vault)
            .checksum(checksum)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(classify)?;

        let archive_id = out
            .archive_id()
            .ok_or_else(|| StoreError::Rejected("UploadArchive returned no archive id".into()))?;

        Ok(UploadReceipt {
            archive_id: archive_id.to_string(),
            location: out.location().unwrap_or_default().to_string(),
            checksum: out.checksum().unwrap_or_default().to_string(),
            status_code: UPLOAD_CREATED,
        })
    }

    async fn initiate_retrieval(
        &self,
        vault: &str,
        archive_id: &str,
        tier: &str,
    ) -> Result<String, StoreError> {
        let parameters = JobParameters::builder()
            .r#type("archive-retrieval")
            .archive_id(archive_id)
            .tier(tier)
            .description("vault-agent retrieval")
            .build();

        let out = self
            .client
            .initiate_job()
            .account_id(&self.account_id)
            .vault_name(vault)
            .job_parameters(parameters)
            .send()
            .await
            .map_err(classify)?;

        out.job_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Rejected("InitiateJob returned no job id".into()))
    }

    async fn job_status(&self, vault: &str, job_id: &str) -> Result<JobStatus, StoreError> {
        let out = self
            .client
            .describe_job()
            .account_id(&self.account_id)
            .vault_name(vault)
            .job_id(job_id)
            .send()
            .await
            .map_err(classify)?;

        let failure = match out.status_code() {
            Some(StatusCode::Failed) => Some(
                out.status_message()
                    .unwrap_or("job failed without a status message")
                    .to_string(),
            ),
            _ => None,
        };

        Ok(JobStatus {
            completed: out.completed(),
            failure,
            archive_size: out.archive_size_in_bytes().map(non_negative),
        })
    }

    async fn job_output(&self, vault: &str, job_id: &str) -> Result<JobOutput, StoreError> {
        let out = self
            .client
            .get_job_output()
            .account_id(&self.account_id)
            .vault_name(vault)
            .job_id(job_id)
            .send()
            .await
            .map_err(classify)?;

        // Length comes from the job description; GetJobOutput only carries a range
        Ok(JobOutput {
            content_length: None,
            body: Box::pin(out.body.into_async_read()),
        })
    }
}
