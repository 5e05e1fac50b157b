use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_s3::primitives::ByteStream;
use log::{debug, info};
use std::path::Path;

use crate::core::config::{AwsConfig, WorkerConfig};
use crate::core::io::{BlobStore, JobLedger, JobQueue, QueueMessage};
use crate::core::state::JobStatus;

const JOB_KEY: &str = "JobID";

/// Service clients sharing one loaded SDK configuration.
#[derive(Clone)]
pub struct AwsClients {
    pub s3: aws_sdk_s3::Client,
    pub sqs: aws_sdk_sqs::Client,
    pub dynamodb: aws_sdk_dynamodb::Client,
}

impl AwsClients {
    /// Credentials come from the default provider chain.
    pub async fn connect(config: &AwsConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        info!("AWS clients initialized for region {}", config.region);
        Self {
            s3: aws_sdk_s3::Client::new(&sdk_config),
            sqs: aws_sdk_sqs::Client::new(&sdk_config),
            dynamodb: aws_sdk_dynamodb::Client::new(&sdk_config),
        }
    }

    pub fn blob_store(&self, config: &AwsConfig) -> S3BlobStore {
        S3BlobStore::new(self.s3.clone(), config.bucket.clone())
    }

    pub fn ledger(&self, config: &AwsConfig) -> DynamoJobLedger {
        DynamoJobLedger::new(self.dynamodb.clone(), config.table_name.clone())
    }

    pub fn queue(&self, config: &AwsConfig, worker: &WorkerConfig) -> SqsJobQueue {
        SqsJobQueue::new(self.sqs.clone(), config.queue_url.clone(), worker.poll_wait_seconds)
    }
}

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn download(&self, key: &str, dest: &Path) -> Result<()> {
        debug!("Downloading s3://{}/{} to {}", self.bucket, key, dest.display());
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to fetch s3://{}/{}", self.bucket, key))?;
        let bytes = object
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.bucket, key))?
            .into_bytes();
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        Ok(())
    }

    async fn upload(&self, source: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(source)
            .await
            .with_context(|| format!("Failed to open {}", source.display()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to store s3://{}/{}", self.bucket, key))?;
        Ok(())
    }
}

/// Job table with the job id as partition key.
pub struct DynamoJobLedger {
    client: aws_sdk_dynamodb::Client,
    table_name: String,
}

impl DynamoJobLedger {
    pub fn new(client: aws_sdk_dynamodb::Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl JobLedger for DynamoJobLedger {
    async fn set_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key(JOB_KEY, AttributeValue::S(job_id.to_string()))
            .update_expression("SET JobStatus = :status")
            .expression_attribute_values(":status", AttributeValue::S(status.as_str().to_string()))
            .send()
            .await
            .with_context(|| format!("Failed to set status {} for job {}", status, job_id))?;
        info!("[{}] - Status updated to {}", job_id, status);
        Ok(())
    }

    async fn set_failed(&self, job_id: &str, error_message: &str) -> Result<()> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key(JOB_KEY, AttributeValue::S(job_id.to_string()))
            .update_expression("SET JobStatus = :status, ErrorMessage = :error")
            .expression_attribute_values(
                ":status",
                AttributeValue::S(JobStatus::Failed.as_str().to_string()),
            )
            .expression_attribute_values(":error", AttributeValue::S(error_message.to_string()))
            .send()
            .await
            .with_context(|| format!("Failed to mark job {} as FAILED", job_id))?;
        info!("[{}] - Status updated to {}", job_id, JobStatus::Failed);
        Ok(())
    }
}

pub struct SqsJobQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    wait_seconds: i32,
}

impl SqsJobQueue {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: String, wait_seconds: u64) -> Self {
        Self {
            client,
            queue_url,
            // SQS caps long polling at 20 seconds.
            wait_seconds: wait_seconds.min(20) as i32,
        }
    }
}

fn to_queue_message(message: aws_sdk_sqs::types::Message) -> Result<QueueMessage> {
    let receipt_handle = message
        .receipt_handle
        .ok_or_else(|| anyhow!("Received a message without a receipt handle"))?;
    Ok(QueueMessage {
        body: message.body.unwrap_or_default(),
        receipt_handle,
    })
}

#[async_trait]
impl JobQueue for SqsJobQueue {
    async fn receive(&self) -> Result<Option<QueueMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(self.wait_seconds)
            .send()
            .await
            .context("Failed to receive from the job queue")?;
        output
            .messages
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(to_queue_message)
            .transpose()
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .context("Failed to delete message from the job queue")?;
        Ok(())
    }
}
