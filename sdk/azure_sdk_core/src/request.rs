//! Outbound HTTP requests with a replayable body.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Extensions, HeaderMap, Method};
use serde::Serialize;
use url::Url;

use crate::error::{Error, Result};

/// A body stream that can be rewound for retries.
pub trait SeekableStream: Read + Seek + Send + 'static {}

impl<T: Read + Seek + Send + 'static> SeekableStream for T {}

/// Shared handle to a request body. Clones refer to the same stream.
#[derive(Clone)]
pub struct Body {
    stream: Arc<Mutex<Box<dyn SeekableStream>>>,
    len: u64,
}

impl Body {
    fn with_stream<R>(&self, f: impl FnOnce(&mut dyn SeekableStream) -> std::io::Result<R>) -> Result<R> {
        let mut guard = self
            .stream
            .lock()
            .map_err(|_| Error::Io(std::io::Error::other("request body lock poisoned")))?;
        Ok(f(guard.as_mut())?)
    }

    /// Length measured when the body was set.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` for a zero-length body.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").field("len", &self.len).finish()
    }
}

/// An HTTP request under construction.
///
/// Cloning is shallow: headers and per-operation values are copied while the
/// body stream is shared, so a clone rewound by one attempt is rewound for all.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Body>,
    values: Extensions,
}

impl Request {
    /// Create a request. The URL must be http(s) and carry a host.
    pub fn new(method: Method, url: Url) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "unsupported protocol scheme {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::InvalidUrl(format!("no host in request URL {url}")));
        }
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            values: Extensions::new(),
        })
    }

    /// Parse `url` and create a request.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        Self::new(method, Url::parse(url)?)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    /// Merge a query parameter into the URL.
    pub fn append_query(&mut self, key: &str, value: &str) {
        self.url.query_pairs_mut().append_pair(key, value);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set a header, replacing any previous value.
    pub fn insert_header(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|e| Error::Config(format!("invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Set the body from a seekable stream.
    ///
    /// The length is measured by seeking to the end and back. A zero-length
    /// stream is dropped and the request is sent without a body.
    pub fn set_body<S: SeekableStream>(&mut self, mut stream: S, content_type: &str) -> Result<()> {
        let len = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(0))?;
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        if len == 0 {
            self.body = None;
            self.headers.remove(CONTENT_TYPE);
            return Ok(());
        }
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|e| Error::Config(format!("invalid content type: {e}")))?;
        self.headers.insert(CONTENT_TYPE, content_type);
        self.body = Some(Body {
            stream: Arc::new(Mutex::new(Box::new(stream))),
            len,
        });
        Ok(())
    }

    /// Set an in-memory body.
    pub fn set_bytes(&mut self, bytes: impl Into<Bytes>, content_type: &str) -> Result<()> {
        self.set_body(std::io::Cursor::new(bytes.into()), content_type)
    }

    /// Serialize `value` as the JSON body.
    pub fn set_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set_bytes(bytes, "application/json")
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Seek the body back to offset 0. No-op without a body.
    pub fn rewind_body(&self) -> Result<()> {
        if let Some(body) = &self.body {
            body.with_stream(|s| s.seek(SeekFrom::Start(0)).map(|_| ()))?;
        }
        Ok(())
    }

    /// Read the body from its current position to the end.
    ///
    /// Leaves the stream at its end; callers that read ahead of the
    /// transport must [`rewind_body`](Self::rewind_body) afterwards.
    pub fn body_bytes(&self) -> Result<Bytes> {
        match &self.body {
            Some(body) => {
                let capacity = usize::try_from(body.len).unwrap_or(0);
                let buf = body.with_stream(|s| {
                    let mut buf = Vec::with_capacity(capacity);
                    s.read_to_end(&mut buf)?;
                    Ok(buf)
                })?;
                Ok(Bytes::from(buf))
            }
            None => Ok(Bytes::new()),
        }
    }

    /// Store a per-operation value, keyed by its type.
    ///
    /// Each policy keeps at most one value of a type it owns, so its state
    /// survives repeated entries into the chain without leaking to others.
    pub fn insert_value<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.values.insert(value)
    }

    /// Look up a per-operation value by type.
    pub fn value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    /// Ask the body download policy to leave the response body streaming.
    pub fn skip_body_download(&mut self) {
        self.insert_value(SkipBodyDownload);
    }
}

/// Marker that disables response body buffering for one operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipBodyDownload;
