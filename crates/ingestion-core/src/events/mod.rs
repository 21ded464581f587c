mod hub;
mod terminal_sink;
mod types;

pub use hub::{EventHub, EventSink};
pub use terminal_sink::TerminalEventSink;
pub use types::{
    CheckpointAdvancedEvent, CredentialEvent, CredentialRefreshedEvent, Event, JobCancelledEvent,
    JobCompletedEvent, JobEvent, JobFailedEvent, JobStartedEvent, UnavailableEndEvent,
    UnavailableStartEvent, UploadEvent, UploadFailedEvent, UploadRateLimitedEvent,
    UploadSucceededEvent, WebhookDeliveredEvent, WebhookDeliveryFailedEvent, WebhookEvent,
};
