//! Snapshot operations.
//!
//! Creating a snapshot is a long-running operation: the store answers `201`
//! with an `Operation-Location` to poll, then the snapshot itself is fetched.
//!
//! ```rust,no_run
//! use azure_sdk_appconfig::client::ConfigurationClient;
//! use azure_sdk_appconfig::models::{SettingFilter, Snapshot};
//! use azure_sdk_appconfig::snapshot;
//! use azure_sdk_core::Context;
//! use std::time::Duration;
//!
//! # async fn example() -> azure_sdk_core::Result<()> {
//! let client = ConfigurationClient::from_env()?;
//! let ctx = Context::new();
//!
//! let definition = Snapshot::new(vec![SettingFilter::key("app/*").with_label("prod")]);
//! let poller = snapshot::begin_create(&client, &ctx, "release-42", &definition).await?;
//!
//! // Persist this to resume from another process.
//! let token = poller.resume_token()?;
//!
//! let poller = snapshot::resume_create(&client, &token)?;
//! let outcome = poller.poll_until_done(&ctx, Some(Duration::from_secs(2))).await?;
//! println!("{:?}", outcome.value.status);
//! # Ok(())
//! # }
//! ```

use azure_sdk_core::context::Context;
use azure_sdk_core::error::Result;
use azure_sdk_core::poller::{Poller, PollerOptions, PollerType};
use http::{Method, StatusCode};

use crate::client::ConfigurationClient;
use crate::models::{SettingFilter, Snapshot, SnapshotStatus, SnapshotUpdate, SNAPSHOT_CONTENT_TYPE};

const ACCEPT_SNAPSHOT: &str = "application/vnd.microsoft.appconfig.snapshot+json, application/problem+json";
const MERGE_PATCH: &str = "application/merge-patch+json";

fn create_options() -> Result<PollerOptions> {
    Ok(PollerOptions::new(PollerType::new("appconfig", "CreateSnapshot")?))
}

/// Start creating snapshot `name` from `definition`.
///
/// An empty filter list captures every key (`*`).
///
/// # Tracing
///
/// Emits a span named `appconfig::snapshots::begin_create` with field `name`.
#[tracing::instrument(name = "appconfig::snapshots::begin_create", skip(client, ctx, definition), fields(name = %name))]
pub async fn begin_create(
    client: &ConfigurationClient,
    ctx: &Context,
    name: &str,
    definition: &Snapshot,
) -> Result<Poller<Snapshot>> {
    let mut body = definition.clone();
    if body.filters.is_empty() {
        body.filters.push(SettingFilter::key("*"));
    }

    let mut request = client.request(Method::PUT, &["snapshots", name])?;
    request.insert_header("accept", ACCEPT_SNAPSHOT)?;
    request.set_bytes(serde_json::to_vec(&body)?, SNAPSHOT_CONTENT_TYPE)?;

    let response = client.pipeline().send(ctx, &mut request).await?;
    tracing::debug!(status = response.status().as_u16(), "snapshot creation started");
    Poller::new(ctx, response, client.pipeline().clone(), create_options()?).await
}

/// Rebuild a [`begin_create`] poller from its resume token.
pub fn resume_create(client: &ConfigurationClient, token: &str) -> Result<Poller<Snapshot>> {
    Poller::from_resume_token(token, client.pipeline().clone(), create_options()?)
}

/// Fetch a snapshot's metadata.
///
/// # Tracing
///
/// Emits a span named `appconfig::snapshots::get` with field `name`.
#[tracing::instrument(name = "appconfig::snapshots::get", skip(client, ctx), fields(name = %name))]
pub async fn get(client: &ConfigurationClient, ctx: &Context, name: &str) -> Result<Snapshot> {
    let mut request = client.request(Method::GET, &["snapshots", name])?;
    request.insert_header("accept", ACCEPT_SNAPSHOT)?;
    let response = client.send(ctx, &mut request, &[StatusCode::OK]).await?;
    response.json()
}

/// Archive a ready snapshot. It is deleted once its retention period ends.
#[tracing::instrument(name = "appconfig::snapshots::archive", skip(client, ctx), fields(name = %name))]
pub async fn archive(client: &ConfigurationClient, ctx: &Context, name: &str) -> Result<Snapshot> {
    update_status(client, ctx, name, SnapshotStatus::Archived).await
}

/// Return an archived snapshot to the ready state.
#[tracing::instrument(name = "appconfig::snapshots::recover", skip(client, ctx), fields(name = %name))]
pub async fn recover(client: &ConfigurationClient, ctx: &Context, name: &str) -> Result<Snapshot> {
    update_status(client, ctx, name, SnapshotStatus::Ready).await
}

async fn update_status(
    client: &ConfigurationClient,
    ctx: &Context,
    name: &str,
    status: SnapshotStatus,
) -> Result<Snapshot> {
    let mut request = client.request(Method::PATCH, &["snapshots", name])?;
    request.insert_header("accept", ACCEPT_SNAPSHOT)?;
    request.set_bytes(serde_json::to_vec(&SnapshotUpdate { status })?, MERGE_PATCH)?;
    let response = client.send(ctx, &mut request, &[StatusCode::OK]).await?;
    let snapshot: Snapshot = response.json()?;

    tracing::debug!(status = ?snapshot.status, "snapshot status updated");
    Ok(snapshot)
}
