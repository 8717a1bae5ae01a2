//! Inbound HTTP responses.

use std::fmt;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::header::RETRY_AFTER;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::context::Context;
use crate::error::{Error, Result};

/// A streaming response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

enum ResponseBody {
    Stream(BodyStream),
    Buffered(Bytes),
    Drained,
}

/// An HTTP response plus the method and URL of the request that produced it.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    request_method: Method,
    request_url: Url,
}

const RETRY_AFTER_MS: &str = "retry-after-ms";
const X_MS_RETRY_AFTER_MS: &str = "x-ms-retry-after-ms";

impl Response {
    /// Build a response with a buffered body.
    pub fn from_parts(
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<Bytes>,
        request_method: Method,
        request_url: Url,
    ) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Buffered(body.into()),
            request_method,
            request_url,
        }
    }

    /// Build a response whose body is still streaming.
    pub fn from_stream(
        status: StatusCode,
        headers: HeaderMap,
        body: BodyStream,
        request_method: Method,
        request_url: Url,
    ) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Stream(body),
            request_method,
            request_url,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn request_method(&self) -> &Method {
        &self.request_method
    }

    pub fn request_url(&self) -> &Url {
        &self.request_url
    }

    /// Returns `true` if the status is one of `codes`.
    pub fn has_status_code(&self, codes: &[StatusCode]) -> bool {
        codes.contains(&self.status)
    }

    /// Returns `true` while the body has not been buffered or drained.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Buffer a streaming body in memory. No-op if already buffered.
    pub async fn download(&mut self, ctx: &Context) -> Result<()> {
        if let ResponseBody::Stream(stream) = &mut self.body {
            let bytes = ctx.run(collect(stream)).await?;
            self.body = ResponseBody::Buffered(bytes);
        }
        Ok(())
    }

    /// The buffered body, or `None` while streaming or after a drain.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Take the body stream, leaving the response drained.
    ///
    /// A buffered body is returned as a single-chunk stream.
    pub fn take_stream(&mut self) -> Option<BodyStream> {
        match std::mem::replace(&mut self.body, ResponseBody::Drained) {
            ResponseBody::Stream(stream) => Some(stream),
            ResponseBody::Buffered(bytes) => {
                Some(Box::pin(futures::stream::once(async move { Ok(bytes) })))
            }
            ResponseBody::Drained => None,
        }
    }

    /// Deserialize the buffered body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Ok(serde_json::from_slice(bytes)?),
            ResponseBody::Stream(_) => Err(Error::Poller(
                "response body has not been downloaded".into(),
            )),
            ResponseBody::Drained => Err(Error::Poller("response body was drained".into())),
        }
    }

    /// Download if needed, then deserialize the body as JSON.
    pub async fn into_json<T: DeserializeOwned>(mut self, ctx: &Context) -> Result<T> {
        self.download(ctx).await?;
        self.json()
    }

    /// Read the body to the end and discard it. Safe to call repeatedly.
    pub async fn drain(&mut self) {
        if let ResponseBody::Stream(stream) = &mut self.body {
            while stream.next().await.is_some() {}
        }
        self.body = ResponseBody::Drained;
    }

    /// The delay a server asked for before the next request.
    ///
    /// Checks `retry-after-ms`, then `x-ms-retry-after-ms`, then
    /// `Retry-After` (delta-seconds or an HTTP date). Non-positive values
    /// are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        for name in [RETRY_AFTER_MS, X_MS_RETRY_AFTER_MS] {
            if let Some(ms) = self
                .header(name)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
            {
                return Some(Duration::from_millis(ms));
            }
        }
        let raw = self.headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        parse_retry_after(raw, SystemTime::now())
    }
}

pub(crate) fn parse_retry_after(raw: &str, now: SystemTime) -> Option<Duration> {
    if let Ok(seconds) = raw.parse::<i64>() {
        return u64::try_from(seconds)
            .ok()
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
    }
    let date = httpdate::parse_http_date(raw).ok()?;
    date.duration_since(now).ok().filter(|d| !d.is_zero())
}

async fn collect(stream: &mut BodyStream) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            ResponseBody::Stream(_) => "<stream>".to_string(),
            ResponseBody::Buffered(bytes) => format!("<{} bytes>", bytes.len()),
            ResponseBody::Drained => "<drained>".to_string(),
        };
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .field("request_method", &self.request_method)
            .field("request_url", &self.request_url.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn url() -> Url {
        Url::parse("https://contoso.com/x").unwrap()
    }

    fn with_header(name: &'static str, value: &str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        Response::from_parts(StatusCode::TOO_MANY_REQUESTS, headers, "", Method::GET, url())
    }

    fn streaming(chunks: Vec<&'static str>) -> Response {
        let stream = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, Error>(Bytes::from_static(c.as_bytes()))),
        );
        Response::from_stream(
            StatusCode::OK,
            HeaderMap::new(),
            Box::pin(stream),
            Method::GET,
            url(),
        )
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(
            with_header("retry-after", "300").retry_after(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(with_header("retry-after", "0").retry_after(), None);
        assert_eq!(with_header("retry-after", "-5").retry_after(), None);
        assert_eq!(with_header("retry-after", "garbage").retry_after(), None);
    }

    #[test]
    fn retry_after_milliseconds_take_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("10"));
        headers.insert("x-ms-retry-after-ms", HeaderValue::from_static("250"));
        let resp = Response::from_parts(StatusCode::OK, headers, "", Method::GET, url());
        assert_eq!(resp.retry_after(), Some(Duration::from_millis(250)));
        assert_eq!(
            with_header("retry-after-ms", "5").retry_after(),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn retry_after_http_date() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_717);
        let delay = parse_retry_after("Sun, 06 Nov 1994 08:49:37 GMT", now);
        assert_eq!(delay, Some(Duration::from_secs(60)));
        let past = parse_retry_after("Sun, 06 Nov 1994 08:00:00 GMT", now);
        assert_eq!(past, None);
    }

    #[test]
    fn status_code_helper() {
        let resp = with_header("x", "y");
        assert!(resp.has_status_code(&[StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]));
        assert!(!resp.has_status_code(&[StatusCode::OK]));
    }

    #[tokio::test]
    async fn download_buffers_stream() {
        let mut resp = streaming(vec!["{\"a\":", "1}"]);
        assert!(resp.is_streaming());
        assert!(resp.json::<serde_json::Value>().is_err());
        resp.download(&Context::new()).await.unwrap();
        assert_eq!(resp.bytes().unwrap(), &Bytes::from_static(b"{\"a\":1}"));
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn drain_is_idempotent() {
        let mut resp = streaming(vec!["a", "b"]);
        resp.drain().await;
        resp.drain().await;
        assert!(resp.bytes().is_none());
        assert!(!resp.is_streaming());
        assert!(resp.take_stream().is_none());
    }

    #[tokio::test]
    async fn into_json_downloads() {
        let resp = streaming(vec!["[1,2,3]"]);
        let values: Vec<u32> = resp.into_json(&Context::new()).await.unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }
}
