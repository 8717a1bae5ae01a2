//! Session consistency through `Sync-Token` headers.
//!
//! Every write answered by the service carries a `Sync-Token` header of
//! comma separated entries `id=value;sn=N`. Replaying the newest entry per
//! id on later requests guarantees reads observe those writes, even when a
//! different replica serves them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use azure_sdk_core::context::Context;
use azure_sdk_core::error::{Error, Result};
use azure_sdk_core::pipeline::{Next, Policy};
use azure_sdk_core::request::Request;
use azure_sdk_core::response::Response;

pub const SYNC_TOKEN: &str = "sync-token";

const SEQUENCE_NUMBER: &str = "sn";

/// One `id=value[;sn=N]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncToken {
    pub id: String,
    pub value: String,
    pub sequence_number: Option<u64>,
}

impl SyncToken {
    /// Parse a single entry. Segments are separated by `;` and may appear in
    /// any order; whitespace around keys and values is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut pair: Option<(String, String)> = None;
        let mut sequence_number = None;

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| invalid(raw, "segment is not key=value"))?;
            let (key, value) = (key.trim(), value.trim());
            if key == SEQUENCE_NUMBER {
                let sn = value
                    .parse::<u64>()
                    .map_err(|_| invalid(raw, "sequence number is not a non-negative integer"))?;
                sequence_number = Some(sn);
            } else {
                if key.is_empty() || value.is_empty() {
                    return Err(invalid(raw, "id and value must be non-empty"));
                }
                if pair.replace((key.to_string(), value.to_string())).is_some() {
                    return Err(invalid(raw, "more than one id"));
                }
            }
        }

        let (id, value) = pair.ok_or_else(|| invalid(raw, "missing id=value"))?;
        Ok(Self {
            id,
            value,
            sequence_number,
        })
    }

    /// Parse a header value holding comma separated entries.
    pub fn parse_all(raw: &str) -> Result<Vec<Self>> {
        raw.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    fn supersedes(&self, other: &SyncToken) -> bool {
        match (self.sequence_number, other.sequence_number) {
            (Some(new), Some(old)) => new > old,
            _ => true,
        }
    }
}

fn invalid(raw: &str, reason: &str) -> Error {
    Error::Config(format!("invalid sync token {raw:?}: {reason}"))
}

/// Tokens seen so far, newest per id. Shared by clones.
#[derive(Debug, Clone, Default)]
pub struct SyncTokenCache {
    tokens: Arc<Mutex<BTreeMap<String, SyncToken>>>,
}

impl SyncTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a raw `Sync-Token` header value.
    pub fn update(&self, raw: &str) -> Result<()> {
        let parsed = SyncToken::parse_all(raw)?;
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        for token in parsed {
            match tokens.get(&token.id) {
                Some(existing) if !token.supersedes(existing) => {}
                _ => {
                    tokens.insert(token.id.clone(), token);
                }
            }
        }
        Ok(())
    }

    /// The request header value, or `None` when nothing is cached.
    pub fn header_value(&self) -> Option<String> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        if tokens.is_empty() {
            return None;
        }
        let joined = tokens
            .values()
            .map(|t| format!("{}={}", t.id, t.value))
            .collect::<Vec<_>>()
            .join(",");
        Some(joined)
    }

    pub fn get(&self, id: &str) -> Option<SyncToken> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

/// Sends cached tokens and records the ones the service returns.
#[derive(Debug, Clone, Default)]
pub struct SyncTokenPolicy {
    cache: SyncTokenCache,
}

impl SyncTokenPolicy {
    pub fn new(cache: SyncTokenCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &SyncTokenCache {
        &self.cache
    }
}

#[async_trait]
impl Policy for SyncTokenPolicy {
    async fn send(&self, ctx: &Context, request: &mut Request, next: Next<'_>) -> Result<Response> {
        if let Some(value) = self.cache.header_value() {
            request.insert_header(SYNC_TOKEN, value)?;
        }

        let response = next.run(ctx, request).await?;

        for value in response.headers().get_all(SYNC_TOKEN) {
            let Ok(raw) = value.to_str() else {
                tracing::warn!("ignoring non-ASCII Sync-Token header");
                continue;
            };
            if let Err(e) = self.cache.update(raw) {
                tracing::warn!(error = %e, "ignoring malformed Sync-Token header");
            }
        }
        Ok(response)
    }
}
