//! Error taxonomy and normalization.
//!
//! Every failure the crate surfaces is a [`SforceError`]. The server speaks
//! four structurally different error shapes (standard REST error arrays,
//! invokable-action result lists, conditional-request statuses, composite
//! sub-response lists); [`SforceError::normalize`] folds any of them into a
//! uniform `{kind, details}` view so callers can build a message without
//! re-parsing transport internals.

use serde_json::Value;
use thiserror::Error;

// ── Error type ──────────────────────────────────────────────────────

/// One failing sub-operation of a composite or batch call.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// HTTP status of the sub-response.
    pub status: u16,
    /// Raw result body of the sub-response (usually a REST error array).
    pub result: Value,
    /// Reference id of the sub-request, where the flavor carries one.
    pub reference_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum SforceError {
    /// The server answered with a non-success status.
    #[error("{method} {url} returned HTTP {status}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: Value,
    },

    /// One or more sub-operations of a composite call failed. Side effects
    /// of the successful sub-operations are not rolled back.
    #[error("{message}")]
    CompositeFailure {
        message: String,
        failures: Vec<BatchFailure>,
    },

    /// Conditional update returned 304 for a read-conditional header set.
    #[error("not modified")]
    NotModified,

    /// Conditional update returned 412 for a write-conditional header set.
    #[error("precondition failed")]
    PreconditionFailed,

    /// The request never produced a response.
    #[error("connection: {0}")]
    Connection(String),

    /// A response or row could not be interpreted.
    #[error("decode: {0}")]
    Decode(String),

    /// No descriptor exists for the named field.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// The operation needs a record id the entity does not have yet.
    #[error("{0} requires a record id")]
    MissingId(&'static str),
}

// ── Normalization ───────────────────────────────────────────────────

/// Classification of a [`SforceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request reached the server and came back with an error response.
    Transport,
    /// An invokable-action call where individual actions failed.
    InvokableAction,
    /// A conditional request header was not satisfied (304 / 412).
    Conditional,
    /// A composite call with failing sub-operations.
    CompositeBatch,
    /// Anything else; only the message is available.
    Generic,
}

/// A single error entry extracted from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    pub code: Option<String>,
}

/// Uniform view of a failure: its kind, the original error, and the
/// flattened detail list.
#[derive(Debug)]
pub struct NormalizedError<'a> {
    pub kind: ErrorKind,
    pub error: &'a SforceError,
    pub details: Vec<ErrorDetail>,
}

impl SforceError {
    /// Classify this error and extract its detail list. First match wins:
    /// a response body of invokable-action results reclassifies an HTTP
    /// error as [`ErrorKind::InvokableAction`], status 412 as
    /// [`ErrorKind::Conditional`]; composite failures flatten every failing
    /// sub-operation; everything else is [`ErrorKind::Generic`] with the
    /// message as its only detail.
    pub fn normalize(&self) -> NormalizedError<'_> {
        match self {
            Self::Http { status, body, .. } => {
                if is_invokable_body(body) {
                    NormalizedError {
                        kind: ErrorKind::InvokableAction,
                        error: self,
                        details: invokable_details(body),
                    }
                } else {
                    let kind = if *status == 412 {
                        ErrorKind::Conditional
                    } else {
                        ErrorKind::Transport
                    };
                    NormalizedError { kind, error: self, details: rest_details(body) }
                }
            }
            Self::CompositeFailure { failures, .. } => {
                let details = failures.iter().flat_map(|f| rest_details(&f.result)).collect();
                NormalizedError { kind: ErrorKind::CompositeBatch, error: self, details }
            }
            Self::NotModified | Self::PreconditionFailed => NormalizedError {
                kind: ErrorKind::Conditional,
                error: self,
                details: vec![ErrorDetail { message: self.to_string(), code: None }],
            },
            _ => NormalizedError {
                kind: ErrorKind::Generic,
                error: self,
                details: vec![ErrorDetail { message: self.to_string(), code: None }],
            },
        }
    }
}

/// Invokable-action responses are arrays whose elements carry `actionName`.
fn is_invokable_body(body: &Value) -> bool {
    match body.as_array() {
        Some(items) => !items.is_empty() && items[0].get("actionName").is_some(),
        None => false,
    }
}

/// Flatten the `errors` list of every action result into details.
fn invokable_details(body: &Value) -> Vec<ErrorDetail> {
    let mut details = Vec::new();
    if let Some(items) = body.as_array() {
        for item in items {
            if let Some(errors) = item.get("errors").and_then(Value::as_array) {
                for e in errors {
                    details.push(ErrorDetail {
                        message: string_at(e, "message"),
                        code: e.get("statusCode").and_then(Value::as_str).map(str::to_string),
                    });
                }
            }
        }
    }
    details
}

/// Extract details from a standard REST error body: an array of
/// `{message, errorCode}` objects, a single such object, or plain text.
fn rest_details(body: &Value) -> Vec<ErrorDetail> {
    match body {
        Value::Array(items) => items
            .iter()
            .map(|e| ErrorDetail {
                message: string_at(e, "message"),
                code: e.get("errorCode").and_then(Value::as_str).map(str::to_string),
            })
            .collect(),
        Value::Object(_) => vec![ErrorDetail {
            message: string_at(body, "message"),
            code: body.get("errorCode").and_then(Value::as_str).map(str::to_string),
        }],
        Value::String(s) => vec![ErrorDetail { message: s.clone(), code: None }],
        _ => Vec::new(),
    }
}

fn string_at(value: &Value, key: &str) -> String {
    match value.get(key).and_then(Value::as_str) {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}
