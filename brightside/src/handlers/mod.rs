//! Request handlers for the two public endpoints.
//!
//! Each handler is a plain async function from the parsed request body to an [`ApiReply`];
//! the Rocket routes in `server` only dispatch on method and path.

use std::fmt;
use std::sync::Arc;

use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde_json::{json, Value};

use crate::llm::CompletionProvider;

pub mod chat;
pub mod scoring;

/// Everything a handler needs, injected once at startup.
#[derive(Clone)]
pub struct ApiContext {
    /// Bearer credential for the upstream. `None` turns every POST into a 500.
    pub api_key: Option<String>,
    /// Name of the env var the key is read from, used in the missing-key message
    pub api_key_env: String,
    pub model: String,
    pub provider: Arc<dyn CompletionProvider>,
}

impl fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiContext")
            .field("api_key", &self.api_key.as_deref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("model", &self.model)
            .finish()
    }
}

impl ApiContext {
    /// The credential, or the 500 reply to send when it is not configured.
    fn require_api_key(&self) -> Result<&str, ApiReply> {
        self.api_key.as_deref().ok_or_else(|| {
            tracing::error!(env = %self.api_key_env, "upstream API key is not configured");
            ApiReply::error(
                Status::InternalServerError,
                format!("{} is not set", self.api_key_env),
            )
        })
    }
}

/// Status plus optional JSON body. Every endpoint outcome is one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: Status,
    pub body: Option<Value>,
}

impl ApiReply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: Status::Ok,
            body: Some(body),
        }
    }

    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(json!({ "error": message.into() })),
        }
    }

    /// 200 with an empty body, answering a CORS preflight.
    pub fn preflight() -> Self {
        Self {
            status: Status::Ok,
            body: None,
        }
    }

    pub fn method_not_allowed() -> Self {
        Self::error(Status::MethodNotAllowed, "Method not allowed")
    }

    pub fn internal() -> Self {
        Self::error(Status::InternalServerError, "Internal server error")
    }

    /// Upstream answered with a non-success status; only the code is passed on.
    pub fn upstream_failure(upstream_status: u16) -> Self {
        Self {
            status: Status::InternalServerError,
            body: Some(json!({ "error": "OpenAI API error", "status": upstream_status })),
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiReply {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        match self.body {
            Some(body) => (self.status, Json(body)).respond_to(req),
            None => Response::build().status(self.status).ok(),
        }
    }
}

/// JavaScript-style truthiness.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value the way JavaScript's `String()` does.
///
/// Arrays join their elements with `,` (null elements become empty), objects collapse to
/// `[object Object]` and integral numbers print without a fractional part.
pub(crate) fn js_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// `record[key] || ""`: the field as sent when truthy, else an empty string.
pub(crate) fn field_value(record: &Value, key: &str) -> Value {
    match record.get(key) {
        Some(v) if is_truthy(v) => v.clone(),
        _ => Value::String(String::new()),
    }
}
