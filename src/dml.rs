//! Entity lifecycle operations: insert, update, refresh, delete.
//!
//! All of them clear the entity's dirty set on success and leave it
//! untouched on failure, so a failed sync can simply be retried by the
//! caller.

use tracing::debug;

use crate::composite::{Composite, CompositeBatch};
use crate::error::SforceError;
use crate::headers::RequestHeaders;
use crate::object::{DmlMode, SObject, SerializeOptions};
use crate::rest::{DmlResponse, Method, Rest};

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Send every update-writable field instead of only the dirty set.
    pub send_all_fields: bool,
    /// Conditional / call-option headers to attach.
    pub headers: Option<RequestHeaders>,
}

impl Rest {
    /// Create the record. Assigns the returned id to the entity and
    /// clears its dirty set.
    pub async fn insert(&self, obj: &mut SObject) -> Result<(), SforceError> {
        let path = self.sobject_path(obj.describe());
        let body = obj.to_payload(&SerializeOptions::new(DmlMode::Insert));
        let resp = self.request_ok(Method::Post, &path, Some(&body), &[]).await?;
        let ack: DmlResponse = serde_json::from_value(resp.data)
            .map_err(|e| SforceError::Decode(format!("insert response: {e}")))?;
        debug!("inserted {} {:?}", obj.describe().api_name, ack.id);
        obj.id = ack.id;
        obj.clear_modified();
        Ok(())
    }

    /// Create the record and fetch it back in the same round trip: a
    /// composite insert plus a get templated on the new id, materialized
    /// into the entity.
    pub async fn insert_with_refresh(&self, obj: &mut SObject) -> Result<(), SforceError> {
        let mut composite = Composite::new(self);
        composite.add_insert_with_refresh(obj, "newRecord");
        composite.send().await?;
        Ok(())
    }

    /// Update the record: the dirty fields by default, every
    /// update-writable field with `send_all_fields`. Conditional headers
    /// are applied per their group: a 304 against the read-conditional
    /// group and a 412 against the write-conditional group surface as
    /// typed errors; other statuses are unaffected by the header set.
    pub async fn update(&self, obj: &mut SObject, opts: &UpdateOptions) -> Result<(), SforceError> {
        let id = obj.id.clone().ok_or(SforceError::MissingId("update"))?;
        let path = self.sobject_item_path(obj.describe(), &id);
        let mode = if opts.send_all_fields { DmlMode::Update } else { DmlMode::UpdateModifiedOnly };
        let body = obj.to_payload(&SerializeOptions::new(mode));
        let rendered = opts.headers.as_ref().map(RequestHeaders::render).unwrap_or_default();

        let resp = self.request(Method::Patch, &path, Some(&body), &rendered).await?;
        if let Some(headers) = &opts.headers {
            if headers.has_read_conditional() && resp.status == 304 {
                return Err(SforceError::NotModified);
            }
            if headers.has_write_conditional() && resp.status == 412 {
                return Err(SforceError::PreconditionFailed);
            }
        }
        if resp.status >= 300 {
            return Err(SforceError::Http {
                method: Method::Patch.to_string(),
                url: self.absolute(&path),
                status: resp.status,
                body: resp.data,
            });
        }
        obj.clear_modified();
        Ok(())
    }

    /// Update the record and fetch it back in the same round trip (flat
    /// batch: update plus get, materialized into the entity).
    pub async fn update_with_refresh(
        &self,
        obj: &mut SObject,
        send_all_fields: bool,
    ) -> Result<(), SforceError> {
        let mut batch = CompositeBatch::new(self);
        batch.add_update_with_refresh(obj, send_all_fields)?;
        batch.send().await?;
        obj.clear_modified();
        Ok(())
    }

    /// Re-materialize the entity from the server's current record.
    pub async fn refresh(&self, obj: &mut SObject) -> Result<(), SforceError> {
        let id = obj.id.clone().ok_or(SforceError::MissingId("refresh"))?;
        let path = self.sobject_item_path(obj.describe(), &id);
        let resp = self.request_ok(Method::Get, &path, None, &[]).await?;
        obj.apply_row(&resp.data)
    }

    /// Delete the record. Returns the server's acknowledgement; a bodiless
    /// 204 becomes a synthetic success ack.
    pub async fn delete(&self, obj: &SObject) -> Result<DmlResponse, SforceError> {
        let id = obj.id.clone().ok_or(SforceError::MissingId("delete"))?;
        let path = self.sobject_item_path(obj.describe(), &id);
        let resp = self.request_ok(Method::Delete, &path, None, &[]).await?;
        if resp.data.is_null() {
            return Ok(DmlResponse {
                id: Some(id),
                success: true,
                errors: Vec::new(),
                warnings: Vec::new(),
            });
        }
        serde_json::from_value(resp.data)
            .map_err(|e| SforceError::Decode(format!("delete response: {e}")))
    }
}
