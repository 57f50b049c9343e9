//! Transport-independent description of one API call

use reqwest::Method;
use uuid::Uuid;

/// Immutable description of a request, kept so it can be replayed after a
/// credential refresh.
///
/// Whether the request has already been replayed is tracked by `Attempt`,
/// which travels alongside the descriptor instead of being mutated into it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/projects/42`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Correlates the original attempt and its replay in logs
    pub request_id: Uuid,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Which send of a descriptor is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// First send with whatever credential the store holds
    Initial,
    /// The single replay after a successful refresh
    Replay,
}

impl Attempt {
    /// A retried descriptor is never queued for refresh again.
    pub fn is_retried(&self) -> bool {
        matches!(self, Attempt::Replay)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Attempt::Initial => "initial",
            Attempt::Replay => "replay",
        }
    }
}
