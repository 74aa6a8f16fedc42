//! Short-lived, URL-addressed staging of readable streams.
//!
//! An entry is visible from [`StreamRegistry::publish`] until its eviction
//! timer fires. Eviction tasks only hold a weak reference, so dropping the
//! registry turns pending evictions into no-ops.

use crate::stream::ReadableStream;
use log::warn;
use savebridge_rpc::{encode_uri_component, lock_unpoisoned, Location, RpcError, TEN_SECONDS};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use uuid::Uuid;

pub const STREAM_PREFIX: &str = "./sw.cgi/stream";
pub const DEFAULT_STREAM_TTL: Duration = TEN_SECONDS;

/// A download response waiting to be fetched. Clones share one body, which
/// can be taken once.
#[derive(Clone, Debug)]
pub struct StagedResponse {
    url: Location,
    headers: Vec<(String, String)>,
    body: Arc<Mutex<Option<ReadableStream>>>,
}

impl StagedResponse {
    fn attachment(url: Location, body: ReadableStream) -> Self {
        Self {
            url,
            headers: vec![("Content-Disposition".to_string(), "attachment".to_string())],
            body: Arc::new(Mutex::new(Some(body))),
        }
    }

    pub fn url(&self) -> &Location {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn suggested_filename(&self) -> Option<String> {
        self.url.query_param("filename")
    }

    /// The body stream; `None` once someone else took it.
    pub fn take_body(&self) -> Option<ReadableStream> {
        lock_unpoisoned(&self.body).take()
    }

    pub fn body_used(&self) -> bool {
        lock_unpoisoned(&self.body).is_none()
    }
}

#[derive(Debug)]
struct Shared {
    base: Location,
    ttl: Duration,
    entries: Mutex<HashMap<String, StagedResponse>>,
}

#[derive(Clone, Debug)]
pub struct StreamRegistry {
    shared: Arc<Shared>,
}

impl StreamRegistry {
    /// `base` is the worker location staged URLs are resolved against.
    pub fn new(base: Location) -> Self {
        Self::with_ttl(base, DEFAULT_STREAM_TTL)
    }

    pub fn with_ttl(base: Location, ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared { base, ttl, entries: Mutex::new(HashMap::new()) }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.shared.ttl
    }

    /// Stages `stream` and returns the URL it can be fetched from.
    /// Must be called inside a tokio runtime.
    pub fn publish(
        &self,
        stream: ReadableStream,
        requester_origin: &str,
        untrusted_options: &JsonValue,
    ) -> Result<Location, RpcError> {
        let suggested_name = suggested_name(untrusted_options)?;

        let mut reference =
            format!("{STREAM_PREFIX}/{}/{}", encode_uri_component(requester_origin), random_uuid());
        if let Some(name) = suggested_name {
            reference.push_str("?filename=");
            reference.push_str(&encode_uri_component(name));
        }
        let url = self.shared.base.resolve(&reference)?;
        let key = url.stripped().as_str().to_string();

        lock_unpoisoned(&self.shared.entries)
            .insert(key.clone(), StagedResponse::attachment(url.clone(), stream));
        schedule_eviction(Arc::downgrade(&self.shared), key, self.shared.ttl);
        Ok(url)
    }

    /// Finds the entry for `url`, ignoring its query and fragment. The entry stays.
    pub fn lookup(&self, url: &Location) -> Option<StagedResponse> {
        lock_unpoisoned(&self.shared.entries).get(url.stripped().as_str()).cloned()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.shared.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `suggestedName` must be absent or a string; `null` counts as present.
fn suggested_name(untrusted_options: &JsonValue) -> Result<Option<&str>, RpcError> {
    match untrusted_options.get("suggestedName") {
        None => Ok(None),
        Some(JsonValue::String(name)) => Ok(Some(name.as_str())),
        Some(_) => {
            Err(RpcError::Validation("suggestedName should be a string, or undefined".into()))
        }
    }
}

fn schedule_eviction(shared: Weak<Shared>, key: String, ttl: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if lock_unpoisoned(&shared.entries).remove(&key).is_some() {
            warn!("eviction: {key}");
        }
    });
}

fn random_uuid() -> String {
    Uuid::new_v4().to_string()
}
