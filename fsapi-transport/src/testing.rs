//! Scripted in-memory transport for tests
//!
//! Enabled with the `test-support` feature. Responses are queued per request
//! path and replayed in order; every request is recorded so tests can assert
//! exactly which calls reached the "device".

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{parse_body, Element, FsapiRequest, Transport, TransportError};

/// A canned reaction to one request
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Respond with this XML body
    Body(String),
    /// Fail as if the network dropped the request
    NetworkFailure,
    /// Respond with an empty body
    Empty,
    /// Never answer (a long poll the device keeps open)
    Hang,
}

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Scripted>>,
    fallback: HashMap<String, Scripted>,
    log: Vec<FsapiRequest>,
}

/// Transport that replays scripted responses keyed by request path
///
/// Lookup order for a path: the next queued response, then the fallback for
/// that path, then `Hang` for `GET_NOTIFIES` and a network failure for
/// anything else.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot response for `path`
    pub fn push(&self, path: &str, response: Scripted) -> &Self {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script
            .queued
            .entry(path.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Queue a one-shot XML body for `path`
    pub fn push_xml(&self, path: &str, xml: impl Into<String>) -> &Self {
        self.push(path, Scripted::Body(xml.into()))
    }

    /// Response used for `path` once its queue is drained
    pub fn set_fallback(&self, path: &str, response: Scripted) -> &Self {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.fallback.insert(path.to_string(), response);
        self
    }

    /// All requests seen so far, in order
    pub fn requests(&self) -> Vec<FsapiRequest> {
        let script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.log.clone()
    }

    /// Paths of all requests seen so far, in order
    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }

    /// Number of requests whose path starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        let script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script
            .log
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .count()
    }

    fn next_response(&self, request: &FsapiRequest) -> Scripted {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.log.push(request.clone());

        if let Some(next) = script
            .queued
            .get_mut(&request.path)
            .and_then(|queue| queue.pop_front())
        {
            return next;
        }

        if let Some(fallback) = script.fallback.get(&request.path) {
            return fallback.clone();
        }

        if request.path == "GET_NOTIFIES" {
            Scripted::Hang
        } else {
            Scripted::NetworkFailure
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        _address: &str,
        request: &FsapiRequest,
    ) -> Result<Element, TransportError> {
        match self.next_response(request) {
            Scripted::Body(xml) => parse_body(&xml),
            Scripted::NetworkFailure => {
                Err(TransportError::Network("scripted network failure".to_string()))
            }
            Scripted::Empty => Err(TransportError::EmptyBody),
            Scripted::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Network("unreachable".to_string()))
            }
        }
    }
}

/// Builders for FSAPI response bodies
pub mod xml {
    pub fn status(token: &str) -> String {
        format!("<fsapiResponse><status>{}</status></fsapiResponse>", token)
    }

    pub fn ok() -> String {
        status("FS_OK")
    }

    pub fn timeout() -> String {
        status("FS_TIMEOUT")
    }

    pub fn list_end() -> String {
        status("FS_LIST_END")
    }

    pub fn session(id: &str) -> String {
        format!(
            "<fsapiResponse><status>FS_OK</status><sessionId>{}</sessionId></fsapiResponse>",
            id
        )
    }

    pub fn value(value_type: &str, raw: &str) -> String {
        format!(
            "<fsapiResponse><status>FS_OK</status><value><{t}>{v}</{t}></value></fsapiResponse>",
            t = value_type,
            v = raw
        )
    }

    /// One capability-list item with the standard mode fields
    pub fn mode_item(key: i64, id: &str, selectable: bool, label: &str) -> String {
        format!(
            "<item key=\"{key}\">\
             <field name=\"id\"><c8_array>{id}</c8_array></field>\
             <field name=\"selectable\"><u8>{sel}</u8></field>\
             <field name=\"label\"><c8_array>{label}</c8_array></field>\
             <field name=\"streamable\"><u8>0</u8></field>\
             </item>",
            key = key,
            id = id,
            sel = u8::from(selectable),
            label = label
        )
    }

    /// A list page holding the given pre-rendered items
    pub fn items(items: &[String], end: bool) -> String {
        format!(
            "<fsapiResponse><status>FS_OK</status>{}{}</fsapiResponse>",
            items.concat(),
            if end { "<listend/>" } else { "" }
        )
    }

    /// A notification batch of `(node, value type, raw value)` entries
    pub fn notify(entries: &[(&str, &str, &str)]) -> String {
        let body: String = entries
            .iter()
            .map(|(node, t, v)| {
                format!(
                    "<notify node=\"{node}\"><value><{t}>{v}</{t}></value></notify>",
                    node = node,
                    t = t,
                    v = v
                )
            })
            .collect();
        format!("<fsapiResponse><status>FS_OK</status>{}</fsapiResponse>", body)
    }
}
