use crate::fault::{describe_records, FaultRecord};
use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("API responded with error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("OAuth token request failed with '{error}': {description}")]
    OAuthTokenRequest { error: String, description: String },

    #[error("The OAuth response state '{received}' does not match the client request state")]
    ConsentStateMismatch { received: String },

    #[error("Consent was not granted ('{error}'): {description}")]
    ConsentDenied { error: String, description: String },

    #[error("The response URI does not contain an authorization 'code' parameter")]
    MissingAuthorizationCode,

    #[error("No access token available, authenticate first")]
    NotAuthenticated,

    #[error("Remote service responded with status {status}")]
    RemoteFault {
        status: u16,
        detail: serde_json::Value,
    },

    #[error("Remote service reported {} error(s): {}", .records.len(), describe_records(.records))]
    RemoteStructuredFault { records: Vec<FaultRecord> },

    #[error("Remote service could not process the request: {}", .messages.join("; "))]
    RemoteSerializationFault { messages: Vec<String> },

    #[error("Unknown fault payload: {payload}")]
    UnknownFault { payload: String },

    #[error("{message}")]
    OpaqueFailure { message: String },

    #[error("Report was not ready after {attempts} poll attempts")]
    Timeout { attempts: u32 },

    #[error("Download did not complete within {timeout_ms} ms")]
    DownloadTimedOut { timeout_ms: u128 },

    #[error("Result file {path} already exists")]
    FileExists { path: String },

    #[error("Uploader exited with {status}")]
    UploadFailed { status: String },

    #[error("{message}")]
    NoData { message: String },

    #[error("Cannot go back {days_back} day(s) after skipping {days_skip} day(s)")]
    InvalidDateRange { days_back: u32, days_skip: u32 },
}
