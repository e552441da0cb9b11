//! Composite orchestration: many logical operations, one round trip.
//!
//! Two wire flavors. The tree flavor ([`Composite`]) correlates by
//! caller-assigned reference ids, returns sub-responses in submission
//! order, and lets a later body template an earlier result via
//! `@{refId.field}` (resolved server-side). The flat flavor
//! ([`CompositeBatch`]) correlates by index and reports failure through a
//! batch-level boolean. Both are network-atomic but semantically
//! partial-failure: a failing sub-operation does not roll back the
//! successful ones, so callers must always inspect per-operation results.
//!
//! Result handlers are bound to the entity that queued the operation and
//! run synchronously, in submission order, before `send` returns — only
//! then is an aggregate failure raised.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{BatchFailure, SforceError};
use crate::object::{DmlMode, SObject, SerializeOptions};
use crate::rest::{Method, Rest};

// ── Handlers ────────────────────────────────────────────────────────

/// How a sub-response is applied. Entity-bound variants index into the
/// builder's entity table, so several operations can target one entity.
enum Handler<'a, R> {
    Ignore,
    /// Copy the returned record id onto the entity.
    AssignId(usize),
    /// Re-materialize the entity from the returned record.
    Materialize(usize),
    Callback(Box<dyn FnMut(&R) -> Result<(), SforceError> + Send + 'a>),
}

fn assign_id(obj: &mut SObject, body: &Value) {
    if let Some(id) = body.get("id").and_then(Value::as_str) {
        obj.id = Some(id.to_string());
    }
}

// ── Tree flavor ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeRequest {
    pub method: Method,
    pub url: String,
    /// Caller-assigned token, unique within one composite call.
    pub reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSubResponse {
    pub http_status_code: u16,
    #[serde(default)]
    pub body: Value,
    pub reference_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResult {
    pub composite_response: Vec<CompositeSubResponse>,
}

pub type CompositeCallback<'a> =
    Box<dyn FnMut(&CompositeSubResponse) -> Result<(), SforceError> + Send + 'a>;

/// Builder for one tree-flavor composite call.
pub struct Composite<'a> {
    rest: &'a Rest,
    requests: Vec<CompositeRequest>,
    handlers: Vec<Handler<'a, CompositeSubResponse>>,
    objects: Vec<&'a mut SObject>,
}

impl<'a> Composite<'a> {
    pub fn new(rest: &'a Rest) -> Self {
        Self { rest, requests: Vec::new(), handlers: Vec::new(), objects: Vec::new() }
    }

    /// Queue a raw operation with an optional handler.
    pub fn add_request(
        &mut self,
        request: CompositeRequest,
        callback: Option<CompositeCallback<'a>>,
    ) -> &mut Self {
        self.requests.push(request);
        self.handlers.push(match callback {
            Some(cb) => Handler::Callback(cb),
            None => Handler::Ignore,
        });
        self
    }

    /// Queue an insert; the returned id is copied onto the entity.
    pub fn add_insert(&mut self, obj: &'a mut SObject, reference_id: impl Into<String>) -> &mut Self {
        let url = self.rest.sobject_path(obj.describe());
        let body = obj.to_payload(&SerializeOptions::new(DmlMode::Insert));
        let slot = self.register(obj);
        self.requests.push(CompositeRequest {
            method: Method::Post,
            url,
            reference_id: reference_id.into(),
            body: Some(body),
        });
        self.handlers.push(Handler::AssignId(slot));
        self
    }

    /// Queue an insert followed by a templated fetch of the new record,
    /// which is materialized back into the entity.
    pub fn add_insert_with_refresh(
        &mut self,
        obj: &'a mut SObject,
        reference_id: impl Into<String>,
    ) -> &mut Self {
        let reference_id = reference_id.into();
        let url = self.rest.sobject_path(obj.describe());
        let body = obj.to_payload(&SerializeOptions::new(DmlMode::Insert));
        let slot = self.register(obj);
        self.requests.push(CompositeRequest {
            method: Method::Post,
            url: url.clone(),
            reference_id: reference_id.clone(),
            body: Some(body),
        });
        self.handlers.push(Handler::AssignId(slot));
        self.requests.push(CompositeRequest {
            method: Method::Get,
            url: format!("{url}/@{{{reference_id}.id}}"),
            reference_id: format!("{reference_id}Fetch"),
            body: None,
        });
        self.handlers.push(Handler::Materialize(slot));
        self
    }

    /// Queue a fetch of the entity's record; the result is materialized
    /// back into it.
    pub fn add_get(
        &mut self,
        obj: &'a mut SObject,
        reference_id: impl Into<String>,
    ) -> Result<&mut Self, SforceError> {
        let id = require_id(obj, "composite get")?;
        let url = self.rest.sobject_item_path(obj.describe(), &id);
        let slot = self.register(obj);
        self.requests.push(CompositeRequest {
            method: Method::Get,
            url,
            reference_id: reference_id.into(),
            body: None,
        });
        self.handlers.push(Handler::Materialize(slot));
        Ok(self)
    }

    /// Queue an update of the entity's record.
    pub fn add_update(
        &mut self,
        obj: &'a mut SObject,
        reference_id: impl Into<String>,
        send_all_fields: bool,
    ) -> Result<&mut Self, SforceError> {
        let id = require_id(obj, "composite update")?;
        let url = self.rest.sobject_item_path(obj.describe(), &id);
        let mode = if send_all_fields { DmlMode::Update } else { DmlMode::UpdateModifiedOnly };
        let body = obj.to_payload(&SerializeOptions::new(mode));
        self.register(obj);
        self.requests.push(CompositeRequest {
            method: Method::Patch,
            url,
            reference_id: reference_id.into(),
            body: Some(body),
        });
        self.handlers.push(Handler::Ignore);
        Ok(self)
    }

    /// Queue a delete of the entity's record.
    pub fn add_delete(
        &mut self,
        obj: &'a mut SObject,
        reference_id: impl Into<String>,
    ) -> Result<&mut Self, SforceError> {
        let id = require_id(obj, "composite delete")?;
        let url = self.rest.sobject_item_path(obj.describe(), &id);
        self.register(obj);
        self.requests.push(CompositeRequest {
            method: Method::Delete,
            url,
            reference_id: reference_id.into(),
            body: None,
        });
        self.handlers.push(Handler::Ignore);
        Ok(self)
    }

    /// Execute every queued operation in one round trip, run the handlers
    /// in submission order, then aggregate sub-responses with status ≥ 300
    /// into a single failure. Successful sub-operations stay applied.
    pub async fn send(mut self) -> Result<CompositeResult, SforceError> {
        debug!("composite send: {} operations", self.requests.len());
        let body = json!({ "compositeRequest": self.requests });
        let resp = self
            .rest
            .request_ok(Method::Post, &self.rest.data_path("composite"), Some(&body), &[])
            .await?;
        let result: CompositeResult = serde_json::from_value(resp.data)
            .map_err(|e| SforceError::Decode(format!("composite response: {e}")))?;

        for (i, sub) in result.composite_response.iter().enumerate() {
            if sub.http_status_code >= 300 {
                continue;
            }
            match self.handlers.get_mut(i) {
                Some(Handler::AssignId(slot)) => assign_id(&mut *self.objects[*slot], &sub.body),
                Some(Handler::Materialize(slot)) => self.objects[*slot].apply_row(&sub.body)?,
                Some(Handler::Callback(cb)) => cb(sub)?,
                Some(Handler::Ignore) | None => {}
            }
        }

        let failures: Vec<BatchFailure> = result
            .composite_response
            .iter()
            .filter(|sub| sub.http_status_code >= 300)
            .map(|sub| BatchFailure {
                status: sub.http_status_code,
                result: sub.body.clone(),
                reference_id: Some(sub.reference_id.clone()),
            })
            .collect();
        if !failures.is_empty() {
            return Err(SforceError::CompositeFailure {
                message: "failed to execute all composite requests".into(),
                failures,
            });
        }
        Ok(result)
    }

    fn register(&mut self, obj: &'a mut SObject) -> usize {
        self.objects.push(obj);
        self.objects.len() - 1
    }
}

// ── Flat batch flavor ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub method: Method,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rich_input: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub status_code: u16,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub has_errors: bool,
    pub results: Vec<BatchResult>,
}

pub type BatchCallback<'a> = Box<dyn FnMut(&BatchResult) -> Result<(), SforceError> + Send + 'a>;

/// Builder for one flat-batch call. Results correlate by index.
pub struct CompositeBatch<'a> {
    rest: &'a Rest,
    requests: Vec<BatchRequest>,
    handlers: Vec<Handler<'a, BatchResult>>,
    objects: Vec<&'a mut SObject>,
}

impl<'a> CompositeBatch<'a> {
    pub fn new(rest: &'a Rest) -> Self {
        Self { rest, requests: Vec::new(), handlers: Vec::new(), objects: Vec::new() }
    }

    /// Queue a raw operation with an optional handler.
    pub fn add_request(
        &mut self,
        request: BatchRequest,
        callback: Option<BatchCallback<'a>>,
    ) -> &mut Self {
        self.requests.push(request);
        self.handlers.push(match callback {
            Some(cb) => Handler::Callback(cb),
            None => Handler::Ignore,
        });
        self
    }

    /// Queue a query; the caller reads the page off the returned results
    /// by index.
    pub fn add_query(&mut self, soql: &str) -> &mut Self {
        let encoded: String =
            url::form_urlencoded::byte_serialize(soql.as_bytes()).collect();
        self.requests.push(BatchRequest {
            method: Method::Get,
            url: self.rest.data_path(&format!("query/?q={encoded}")),
            rich_input: None,
        });
        self.handlers.push(Handler::Ignore);
        self
    }

    pub fn add_insert(&mut self, obj: &'a mut SObject) -> &mut Self {
        let url = self.rest.sobject_path(obj.describe());
        let body = obj.to_payload(&SerializeOptions::new(DmlMode::Insert));
        let slot = self.register(obj);
        self.requests.push(BatchRequest { method: Method::Post, url, rich_input: Some(body) });
        self.handlers.push(Handler::AssignId(slot));
        self
    }

    /// Queue a fetch of the entity's record; the result is materialized
    /// back into it.
    pub fn add_get(&mut self, obj: &'a mut SObject) -> Result<&mut Self, SforceError> {
        let id = require_id(obj, "batch get")?;
        let url = self.rest.sobject_item_path(obj.describe(), &id);
        let slot = self.register(obj);
        self.requests.push(BatchRequest { method: Method::Get, url, rich_input: None });
        self.handlers.push(Handler::Materialize(slot));
        Ok(self)
    }

    pub fn add_update(
        &mut self,
        obj: &'a mut SObject,
        send_all_fields: bool,
    ) -> Result<&mut Self, SforceError> {
        let id = require_id(obj, "batch update")?;
        let url = self.rest.sobject_item_path(obj.describe(), &id);
        let mode = if send_all_fields { DmlMode::Update } else { DmlMode::UpdateModifiedOnly };
        let body = obj.to_payload(&SerializeOptions::new(mode));
        self.register(obj);
        self.requests.push(BatchRequest { method: Method::Patch, url, rich_input: Some(body) });
        self.handlers.push(Handler::Ignore);
        Ok(self)
    }

    /// Queue an update followed by a fetch, materializing the refreshed
    /// record back into the entity.
    pub fn add_update_with_refresh(
        &mut self,
        obj: &'a mut SObject,
        send_all_fields: bool,
    ) -> Result<&mut Self, SforceError> {
        let id = require_id(obj, "batch update")?;
        let url = self.rest.sobject_item_path(obj.describe(), &id);
        let mode = if send_all_fields { DmlMode::Update } else { DmlMode::UpdateModifiedOnly };
        let body = obj.to_payload(&SerializeOptions::new(mode));
        let slot = self.register(obj);
        self.requests.push(BatchRequest {
            method: Method::Patch,
            url: url.clone(),
            rich_input: Some(body),
        });
        self.handlers.push(Handler::Ignore);
        self.requests.push(BatchRequest { method: Method::Get, url, rich_input: None });
        self.handlers.push(Handler::Materialize(slot));
        Ok(self)
    }

    pub fn add_delete(&mut self, obj: &'a mut SObject) -> Result<&mut Self, SforceError> {
        let id = require_id(obj, "batch delete")?;
        let url = self.rest.sobject_item_path(obj.describe(), &id);
        self.register(obj);
        self.requests.push(BatchRequest { method: Method::Delete, url, rich_input: None });
        self.handlers.push(Handler::Ignore);
        Ok(self)
    }

    /// Execute the batch in one round trip, run the handlers in submission
    /// order, then — iff the batch-level flag reports errors — collect the
    /// failing results into a single aggregate failure.
    pub async fn send(mut self) -> Result<BatchResponse, SforceError> {
        debug!("batch send: {} operations", self.requests.len());
        let body = json!({ "batchRequests": self.requests });
        let resp = self
            .rest
            .request_ok(Method::Post, &self.rest.data_path("composite/batch"), Some(&body), &[])
            .await?;
        let result: BatchResponse = serde_json::from_value(resp.data)
            .map_err(|e| SforceError::Decode(format!("batch response: {e}")))?;

        for (i, sub) in result.results.iter().enumerate() {
            if sub.status_code >= 300 {
                continue;
            }
            match self.handlers.get_mut(i) {
                Some(Handler::AssignId(slot)) => assign_id(&mut *self.objects[*slot], &sub.result),
                Some(Handler::Materialize(slot)) => self.objects[*slot].apply_row(&sub.result)?,
                Some(Handler::Callback(cb)) => cb(sub)?,
                Some(Handler::Ignore) | None => {}
            }
        }

        if result.has_errors {
            let failures: Vec<BatchFailure> = result
                .results
                .iter()
                .filter(|sub| sub.status_code >= 300)
                .map(|sub| BatchFailure {
                    status: sub.status_code,
                    result: sub.result.clone(),
                    reference_id: None,
                })
                .collect();
            return Err(SforceError::CompositeFailure {
                message: "failed to execute all batch requests".into(),
                failures,
            });
        }
        Ok(result)
    }

    fn register(&mut self, obj: &'a mut SObject) -> usize {
        self.objects.push(obj);
        self.objects.len() - 1
    }
}

fn require_id(obj: &SObject, op: &'static str) -> Result<String, SforceError> {
    obj.id.clone().ok_or(SforceError::MissingId(op))
}
