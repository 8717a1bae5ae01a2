//! Configuration setting operations.
//!
//! ## Example
//!
//! ```rust,no_run
//! use azure_sdk_appconfig::client::ConfigurationClient;
//! use azure_sdk_appconfig::models::Setting;
//! use azure_sdk_appconfig::setting::{self, SettingOptions};
//! use azure_sdk_core::Context;
//!
//! # async fn example() -> azure_sdk_core::Result<()> {
//! let client = ConfigurationClient::from_env()?;
//! let ctx = Context::new();
//!
//! let stored = setting::set(&client, &ctx, &Setting::new("color", "blue").with_label("prod"), &SettingOptions::default()).await?;
//!
//! // Only delete the version we just wrote.
//! let options = SettingOptions::default().label("prod").if_match(stored.etag.clone().unwrap_or_else(azure_sdk_core::ETag::any));
//! setting::delete(&client, &ctx, "color", &options).await?;
//! # Ok(())
//! # }
//! ```

use azure_sdk_core::context::Context;
use azure_sdk_core::error::Result;
use azure_sdk_core::request::Request;
use azure_sdk_core::ETag;
use http::{Method, StatusCode};

use crate::client::ConfigurationClient;
use crate::models::{Setting, KV_CONTENT_TYPE};

const ACCEPT_KV: &str = "application/vnd.microsoft.appconfig.kv+json, application/problem+json";

/// Label and concurrency options shared by setting operations.
#[derive(Debug, Clone, Default)]
pub struct SettingOptions {
    pub label: Option<String>,
    /// Send `If-Match`, failing with 412 unless the stored setting has this tag.
    pub if_match: Option<ETag>,
}

impl SettingOptions {
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn if_match(mut self, etag: ETag) -> Self {
        self.if_match = Some(etag);
        self
    }
}

fn kv_request(
    client: &ConfigurationClient,
    method: Method,
    collection: &str,
    key: &str,
    label: Option<&str>,
    if_match: Option<&ETag>,
) -> Result<Request> {
    let mut request = client.request(method, &[collection, key])?;
    if let Some(label) = label {
        request.append_query("label", label);
    }
    request.insert_header("accept", ACCEPT_KV)?;
    if let Some(etag) = if_match {
        request.insert_header("if-match", etag.as_str())?;
    }
    Ok(request)
}

/// Fetch a setting.
///
/// # Tracing
///
/// Emits a span named `appconfig::settings::get` with field `key`.
#[tracing::instrument(name = "appconfig::settings::get", skip(client, ctx, options), fields(key = %key))]
pub async fn get(client: &ConfigurationClient, ctx: &Context, key: &str, options: &SettingOptions) -> Result<Setting> {
    tracing::debug!("getting setting");

    let mut request = kv_request(
        client,
        Method::GET,
        "kv",
        key,
        options.label.as_deref(),
        options.if_match.as_ref(),
    )?;
    let response = client.send(ctx, &mut request, &[StatusCode::OK]).await?;
    response.json()
}

/// Create or replace a setting. The label is taken from `setting`.
///
/// # Tracing
///
/// Emits a span named `appconfig::settings::set` with field `key`.
#[tracing::instrument(name = "appconfig::settings::set", skip(client, ctx, setting, options), fields(key = %setting.key))]
pub async fn set(
    client: &ConfigurationClient,
    ctx: &Context,
    setting: &Setting,
    options: &SettingOptions,
) -> Result<Setting> {
    tracing::debug!("setting value");

    let mut request = kv_request(
        client,
        Method::PUT,
        "kv",
        &setting.key,
        setting.label.as_deref(),
        options.if_match.as_ref(),
    )?;
    request.set_bytes(serde_json::to_vec(setting)?, KV_CONTENT_TYPE)?;
    let response = client.send(ctx, &mut request, &[StatusCode::OK, StatusCode::CREATED]).await?;
    response.json()
}

/// Create a setting, failing with 412 if the key and label already exist.
///
/// # Tracing
///
/// Emits a span named `appconfig::settings::add` with field `key`.
#[tracing::instrument(name = "appconfig::settings::add", skip(client, ctx, setting), fields(key = %setting.key))]
pub async fn add(client: &ConfigurationClient, ctx: &Context, setting: &Setting) -> Result<Setting> {
    tracing::debug!("adding setting");

    let mut request = kv_request(client, Method::PUT, "kv", &setting.key, setting.label.as_deref(), None)?;
    request.insert_header("if-none-match", ETag::ANY)?;
    request.set_bytes(serde_json::to_vec(setting)?, KV_CONTENT_TYPE)?;
    let response = client.send(ctx, &mut request, &[StatusCode::OK, StatusCode::CREATED]).await?;
    response.json()
}

/// Delete a setting. Returns the deleted setting, or `None` when it did not exist.
///
/// # Tracing
///
/// Emits a span named `appconfig::settings::delete` with field `key`.
#[tracing::instrument(name = "appconfig::settings::delete", skip(client, ctx, options), fields(key = %key))]
pub async fn delete(
    client: &ConfigurationClient,
    ctx: &Context,
    key: &str,
    options: &SettingOptions,
) -> Result<Option<Setting>> {
    tracing::debug!("deleting setting");

    let mut request = kv_request(
        client,
        Method::DELETE,
        "kv",
        key,
        options.label.as_deref(),
        options.if_match.as_ref(),
    )?;
    let response = client
        .send(ctx, &mut request, &[StatusCode::OK, StatusCode::NO_CONTENT])
        .await?;
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    response.json().map(Some)
}

/// Lock (`read_only = true`) or unlock a setting.
///
/// # Tracing
///
/// Emits a span named `appconfig::settings::set_read_only` with fields `key`
/// and `read_only`.
#[tracing::instrument(
    name = "appconfig::settings::set_read_only",
    skip(client, ctx, options),
    fields(key = %key)
)]
pub async fn set_read_only(
    client: &ConfigurationClient,
    ctx: &Context,
    key: &str,
    read_only: bool,
    options: &SettingOptions,
) -> Result<Setting> {
    let method = if read_only { Method::PUT } else { Method::DELETE };
    let mut request = kv_request(
        client,
        method,
        "locks",
        key,
        options.label.as_deref(),
        options.if_match.as_ref(),
    )?;
    let response = client.send(ctx, &mut request, &[StatusCode::OK]).await?;
    let setting: Setting = response.json()?;

    tracing::debug!(locked = setting.is_read_only(), "lock updated");
    Ok(setting)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_mock_client;
    use azure_sdk_core::Error;
    use serde_json::json;
    use tracing_test::traced_test;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setting_json(key: &str, value: &str, etag: &str) -> serde_json::Value {
        json!({
            "key": key,
            "label": "prod",
            "value": value,
            "etag": etag,
            "locked": false,
            "tags": {}
        })
    }

    #[tokio::test]
    async fn get_sends_label_and_parses_setting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/kv/app%2Fcolor"))
            .and(query_param("label", "prod"))
            .respond_with(ResponseTemplate::new(200).set_body_json(setting_json("app/color", "blue", "\"e1\"")))
            .expect(1)
            .mount(&server)
            .await;
        let client = setup_mock_client(&server);

        let setting = get(&client, &Context::new(), "app/color", &SettingOptions::default().label("prod"))
            .await
            .unwrap();

        assert_eq!(setting.key, "app/color");
        assert_eq!(setting.value.as_deref(), Some("blue"));
        assert_eq!(setting.etag, Some(ETag::from("\"e1\"")));
    }

    #[tokio::test]
    async fn get_missing_setting_is_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let client = setup_mock_client(&server);

        let err = get(&client, &Context::new(), "missing", &SettingOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Response(_)));
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn set_puts_body_with_if_match() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/kv/color"))
            .and(query_param("label", "prod"))
            .and(header("if-match", "\"e1\""))
            .and(header("content-type", KV_CONTENT_TYPE))
            .and(body_json(json!({"key": "color", "label": "prod", "value": "green"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(setting_json("color", "green", "\"e2\"")))
            .expect(1)
            .mount(&server)
            .await;
        let client = setup_mock_client(&server);

        let setting = set(
            &client,
            &Context::new(),
            &Setting::new("color", "green").with_label("prod"),
            &SettingOptions::default().if_match(ETag::from("\"e1\"")),
        )
        .await
        .unwrap();

        assert_eq!(setting.etag, Some(ETag::from("\"e2\"")));
    }

    #[tokio::test]
    async fn set_with_stale_etag_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(412))
            .expect(1)
            .mount(&server)
            .await;
        let client = setup_mock_client(&server);

        let err = set(
            &client,
            &Context::new(),
            &Setting::new("color", "green"),
            &SettingOptions::default().if_match(ETag::from("\"stale\"")),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::PRECONDITION_FAILED));
    }

    #[tokio::test]
    async fn add_sends_if_none_match_any() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/kv/color"))
            .and(header("if-none-match", "*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(setting_json("color", "blue", "\"e1\"")))
            .expect(1)
            .mount(&server)
            .await;
        let client = setup_mock_client(&server);

        let setting = add(&client, &Context::new(), &Setting::new("color", "blue")).await.unwrap();
        assert_eq!(setting.value.as_deref(), Some("blue"));
    }

    #[tokio::test]
    async fn delete_returns_none_for_missing_setting() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/kv/gone"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/kv/color"))
            .respond_with(ResponseTemplate::new(200).set_body_json(setting_json("color", "blue", "\"e1\"")))
            .mount(&server)
            .await;
        let client = setup_mock_client(&server);
        let ctx = Context::new();

        assert!(delete(&client, &ctx, "gone", &SettingOptions::default()).await.unwrap().is_none());
        let deleted = delete(&client, &ctx, "color", &SettingOptions::default()).await.unwrap();
        assert_eq!(deleted.unwrap().key, "color");
    }

    #[tokio::test]
    async fn set_read_only_locks_and_unlocks() {
        let server = MockServer::start().await;
        let mut locked = setting_json("color", "blue", "\"e2\"");
        locked["locked"] = json!(true);
        Mock::given(method("PUT"))
            .and(path("/locks/color"))
            .respond_with(ResponseTemplate::new(200).set_body_json(locked))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/locks/color"))
            .respond_with(ResponseTemplate::new(200).set_body_json(setting_json("color", "blue", "\"e3\"")))
            .expect(1)
            .mount(&server)
            .await;
        let client = setup_mock_client(&server);
        let ctx = Context::new();
        let options = SettingOptions::default();

        assert!(set_read_only(&client, &ctx, "color", true, &options).await.unwrap().is_read_only());
        assert!(!set_read_only(&client, &ctx, "color", false, &options).await.unwrap().is_read_only());
    }

    #[traced_test]
    #[tokio::test]
    async fn operations_emit_spans() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(setting_json("color", "blue", "\"e1\"")))
            .mount(&server)
            .await;
        let client = setup_mock_client(&server);

        get(&client, &Context::new(), "color", &SettingOptions::default())
            .await
            .unwrap();

        assert!(logs_contain("appconfig::settings::get"));
        assert!(logs_contain("getting setting"));
    }
}
