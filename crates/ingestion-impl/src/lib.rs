pub mod credential;
pub mod file_connector;
pub mod http_transport;
pub mod rest_connector;
pub mod upload_client;
pub mod webhook;

pub use credential::{AuthorizationCodeRefresher, ClientCredentialsRefresher, StaticCredentialProvider};
pub use file_connector::{FileDropSource, RecordSource};
pub use http_transport::ReqwestTransport;
pub use rest_connector::{SourcePuller, TransformedBatch};
pub use upload_client::{
    BatchItemResult, BatchResult, HttpUploadGatewayClient, UploadAck, UploadGatewayClient, UploadOptions,
    UploadStatus, DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use webhook::{TriggerAck, TriggerOptions, WebhookDispatcher, DEFAULT_TOLERANCE_SECS};
