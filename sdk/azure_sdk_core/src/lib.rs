#![doc = include_str!("../README.md")]

pub mod auth;
pub mod client;
pub mod context;
pub mod error;
pub mod etag;
pub mod pipeline;
pub mod policies;
pub mod poller;
pub mod request;
pub mod response;
pub mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use auth::{AccessToken, KeyCredential, TokenCredential};
pub use client::{ClientOptions, PipelineBuilder};
pub use context::Context;
pub use error::{Error, ResponseError, Result};
pub use etag::ETag;
pub use pipeline::{Next, Pipeline, Policy};
pub use poller::{Outcome, Poller, PollerOptions, PollerType};
pub use request::Request;
pub use response::Response;
pub use transport::{ReqwestTransport, Transport};
