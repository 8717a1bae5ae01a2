//! Tracking strategies for long-running operations.
//!
//! The strategy is chosen once from the initial response and never changes.
//! All state needed to continue polling lives in [`TrackerState`] so it can
//! be carried in a resume token.

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{FinalStateVia, OperationStatus};
use crate::error::{Error, Result};
use crate::response::Response;

pub(crate) const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
pub(crate) const OPERATION_LOCATION: &str = "operation-location";
pub(crate) const LOCATION: &str = "location";

const IN_PROGRESS: &str = "InProgress";
const SUCCEEDED: &str = "Succeeded";
const FAILED: &str = "Failed";

/// Status codes accepted from an initial response or a status monitor.
pub(crate) const VALID_STATUS_CODES: [StatusCode; 4] = [
    StatusCode::OK,
    StatusCode::CREATED,
    StatusCode::ACCEPTED,
    StatusCode::NO_CONTENT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// `Azure-AsyncOperation` status monitor.
    AsyncOperation,
    /// `Operation-Location` status monitor.
    OperationLocation,
    /// `Location` header, status from the HTTP status code.
    Location,
    /// Original URL, status from `properties.provisioningState`.
    Body,
}

impl Strategy {
    /// Name used in resume token tags.
    pub(crate) fn kind(self) -> &'static str {
        match self {
            Self::AsyncOperation => "asyncPoller",
            Self::OperationLocation => "opPoller",
            Self::Location => "locPoller",
            Self::Body => "bodyPoller",
        }
    }

    pub(crate) fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "asyncPoller" => Some(Self::AsyncOperation),
            "opPoller" => Some(Self::OperationLocation),
            "locPoller" => Some(Self::Location),
            "bodyPoller" => Some(Self::Body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrackerState {
    /// Method of the request that started the operation.
    pub(crate) method: String,
    pub(crate) orig_url: String,
    pub(crate) poll_url: String,
    /// `Location` from the initial response, used for POST final GETs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) location_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) resource_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) final_state_via: Option<FinalStateVia>,
    /// Raw status string as reported by the service.
    pub(crate) status: String,
}

/// Outcome of applying a poll response.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Progress {
    Updated,
    /// The status code is not valid for this strategy; the error handler decides.
    UnexpectedStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tracker {
    pub(crate) strategy: Strategy,
    pub(crate) state: TrackerState,
}

impl Tracker {
    /// Pick a strategy from the initial response. `None` means the operation already finished.
    pub(crate) fn detect(response: &Response, final_state_via: Option<FinalStateVia>) -> Result<Option<Self>> {
        let async_url = header_url(response, AZURE_ASYNC_OPERATION)?;
        let op_url = header_url(response, OPERATION_LOCATION)?;
        let location_url = header_url(response, LOCATION)?;
        let method = response.request_method();

        let (strategy, poll_url, status) = if let Some(url) = async_url {
            (Strategy::AsyncOperation, url, IN_PROGRESS.to_string())
        } else if let Some(url) = op_url {
            (Strategy::OperationLocation, url, IN_PROGRESS.to_string())
        } else if let Some(url) = location_url.clone() {
            (Strategy::Location, url, IN_PROGRESS.to_string())
        } else if response.status() == StatusCode::ACCEPTED {
            return Err(Error::Poller(
                "response is 202 Accepted but carries no polling header".into(),
            ));
        } else if let Some(state) = body_applicable(response, method) {
            (Strategy::Body, response.request_url().to_string(), state)
        } else {
            return Ok(None);
        };

        Ok(Some(Self {
            strategy,
            state: TrackerState {
                method: method.as_str().to_string(),
                orig_url: response.request_url().to_string(),
                poll_url,
                location_url,
                resource_location: None,
                final_state_via,
                status,
            },
        }))
    }

    pub(crate) fn status(&self) -> OperationStatus {
        OperationStatus::parse(&self.state.status)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Apply a poll response to the tracked state.
    pub(crate) fn update(&mut self, response: &Response) -> Result<Progress> {
        let status = response.status();
        match self.strategy {
            Strategy::AsyncOperation | Strategy::OperationLocation => {
                if !matches!(status, StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED) {
                    return Ok(Progress::UnexpectedStatus);
                }
                let body = json_body(response)?;
                let current = body
                    .get("status")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Poller("the response did not contain a status".into()))?;
                self.state.status = current.to_string();
                if self.strategy == Strategy::OperationLocation
                    && OperationStatus::parse(current) == OperationStatus::Succeeded
                {
                    if let Some(location) = body.get("resourceLocation").and_then(Value::as_str) {
                        self.state.resource_location = Some(location.to_string());
                    }
                }
            }
            Strategy::Location => {
                if let Some(next) = header_url(response, LOCATION)? {
                    self.state.poll_url = next;
                }
                self.state.status = if status == StatusCode::ACCEPTED {
                    IN_PROGRESS.to_string()
                } else if status.is_success() {
                    provisioning_state(response).unwrap_or_else(|| SUCCEEDED.to_string())
                } else if status.is_client_error() || status.is_server_error() {
                    FAILED.to_string()
                } else {
                    return Ok(Progress::UnexpectedStatus);
                };
            }
            Strategy::Body => {
                if !VALID_STATUS_CODES.contains(&status) {
                    return Ok(Progress::UnexpectedStatus);
                }
                self.state.status = if status == StatusCode::NO_CONTENT {
                    SUCCEEDED.to_string()
                } else {
                    provisioning_state(response).unwrap_or_else(|| SUCCEEDED.to_string())
                };
            }
        }
        Ok(Progress::Updated)
    }

    /// Where to fetch the final resource once the operation succeeded.
    pub(crate) fn final_get_url(&self) -> Option<String> {
        let state = &self.state;
        let put_or_patch = state.method == Method::PUT.as_str() || state.method == Method::PATCH.as_str();
        let post = state.method == Method::POST.as_str();

        match self.strategy {
            Strategy::Location | Strategy::Body => None,
            Strategy::OperationLocation => {
                if let Some(resource) = &state.resource_location {
                    return Some(resource.clone());
                }
                if put_or_patch {
                    return Some(state.orig_url.clone());
                }
                if post {
                    return match state.final_state_via {
                        Some(FinalStateVia::OperationLocation) => None,
                        Some(FinalStateVia::OriginalUri) => Some(state.orig_url.clone()),
                        _ => state.location_url.clone(),
                    };
                }
                None
            }
            Strategy::AsyncOperation => {
                if put_or_patch {
                    return Some(state.orig_url.clone());
                }
                if post {
                    return match state.final_state_via {
                        Some(FinalStateVia::AzureAsyncOperation) => None,
                        Some(FinalStateVia::OriginalUri) => Some(state.orig_url.clone()),
                        _ => state.location_url.clone(),
                    };
                }
                None
            }
        }
    }
}

/// The non-terminal provisioning state of a PUT/PATCH 200/201 response.
fn body_applicable(response: &Response, method: &Method) -> Option<String> {
    if !(*method == Method::PUT || *method == Method::PATCH) {
        return None;
    }
    if !matches!(response.status(), StatusCode::OK | StatusCode::CREATED) {
        return None;
    }
    provisioning_state(response).filter(|state| !OperationStatus::parse(state).is_terminal())
}

fn header_url(response: &Response, name: &str) -> Result<Option<String>> {
    let Some(raw) = response.header(name).map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(Some(raw.to_string())),
        _ => Err(Error::Poller(format!("invalid polling URL in {name} header: {raw}"))),
    }
}

fn json_body(response: &Response) -> Result<Value> {
    match response.bytes() {
        Some(body) if !body.is_empty() => Ok(serde_json::from_slice(body)?),
        _ => Err(Error::Poller("the response did not contain a body".into())),
    }
}

fn provisioning_state(response: &Response) -> Option<String> {
    let body = response.bytes().filter(|b| !b.is_empty())?;
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .map(str::to_string)
}
