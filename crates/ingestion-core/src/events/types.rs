use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::credential::{CredentialId, UnavailableReason};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Job(JobEvent),
    Upload(UploadEvent),
    Credential(CredentialEvent),
    Webhook(WebhookEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Started(JobStartedEvent),
    Completed(JobCompletedEvent),
    Failed(JobFailedEvent),
    Cancelled(JobCancelledEvent),
    CheckpointAdvanced(CheckpointAdvancedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartedEvent {
    pub at: SystemTime,
    pub trace_id: String,
    pub job_id: String,
    pub connector_instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletedEvent {
    pub at: SystemTime,
    pub job_id: String,
    pub connector_instance_id: String,
    pub records_read: u64,
    pub records_uploaded: u64,
    pub records_failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailedEvent {
    pub at: SystemTime,
    pub job_id: String,
    pub connector_instance_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCancelledEvent {
    pub at: SystemTime,
    pub job_id: String,
    pub connector_instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointAdvancedEvent {
    pub at: SystemTime,
    pub connector_instance_id: String,
    pub source_key: String,
    pub records_processed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UploadEvent {
    Succeeded(UploadSucceededEvent),
    Failed(UploadFailedEvent),
    RateLimited(UploadRateLimitedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSucceededEvent {
    pub at: SystemTime,
    pub connector_instance_id: String,
    pub idempotency_key: String,
    pub attempt_no: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFailedEvent {
    pub at: SystemTime,
    pub connector_instance_id: String,
    pub idempotency_key: String,
    pub attempt_no: u32,
    pub error_kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRateLimitedEvent {
    pub at: SystemTime,
    pub connector_instance_id: String,
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CredentialEvent {
    UnavailableStart(UnavailableStartEvent),
    UnavailableEnd(UnavailableEndEvent),
    Refreshed(CredentialRefreshedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableStartEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
    pub reason: UnavailableReason,
    pub until: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableEndEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRefreshedEvent {
    pub at: SystemTime,
    pub credential_id: CredentialId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WebhookEvent {
    Delivered(WebhookDeliveredEvent),
    DeliveryFailed(WebhookDeliveryFailedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveredEvent {
    pub at: SystemTime,
    pub connector_instance_id: String,
    pub endpoint: String,
    pub status: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryFailedEvent {
    pub at: SystemTime,
    pub connector_instance_id: String,
    pub endpoint: String,
    pub attempt_no: u32,
    pub message: String,
}
