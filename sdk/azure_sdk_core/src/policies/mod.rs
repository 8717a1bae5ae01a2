//! Built-in pipeline policies.

pub mod bearer_token;
pub mod body_download;
pub mod key_credential;
pub mod logging;
pub mod request_id;
pub mod retry;
pub mod telemetry;

pub use bearer_token::{BackgroundRefresh, BearerTokenPolicy};
pub use body_download::BodyDownloadPolicy;
pub use key_credential::KeyCredentialPolicy;
pub use logging::{LoggingOptions, LoggingPolicy};
pub use request_id::{RequestIdPolicy, CLIENT_REQUEST_ID};
pub use retry::{RetryAttempt, RetryMode, RetryOptions, RetryPolicy};
pub use telemetry::{TelemetryOptions, TelemetryPolicy};
