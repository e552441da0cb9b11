//! Entity state: materialization, serialization, dirty tracking.
//!
//! An [`SObject`] is the in-memory image of one remote record. It knows
//! which remote fields were modified since the last sync (the dirty set)
//! so updates can send exactly what changed. The dirty set is cleared by
//! every successful materialize, insert, update and refresh.
//!
//! Mutation contract: [`SObject::set`] tracks automatically; writes that
//! bypass it (hand-built entities, [`SObject::set_untracked`]) must be
//! followed by [`SObject::mark_modified`] or they will not be sent under
//! the modified-only update mode.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};
use tracing::trace;

use crate::describe::{FieldDescriptor, FieldType, RelationKind, SObjectType};
use crate::error::SforceError;
use crate::value::{Children, FieldValue};

// ── Serialization modes ─────────────────────────────────────────────

/// Which fields a DML payload includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlMode {
    /// Every populated field with a descriptor.
    All,
    /// Fields writable on insert.
    Insert,
    /// Fields writable on update.
    Update,
    /// Fields writable on update that are in the dirty set.
    UpdateModifiedOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct SerializeOptions {
    pub mode: DmlMode,
    /// Serialize parent records in full instead of as relation references.
    pub send_parents: bool,
    /// Include child collections (as `{records: [...]}`).
    pub send_children: bool,
}

impl SerializeOptions {
    pub const fn new(mode: DmlMode) -> Self {
        Self { mode, send_parents: false, send_children: false }
    }
}

// ── Attributes ──────────────────────────────────────────────────────

/// The `attributes` block every queried row carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    /// Remote type name.
    pub sobject_type: String,
    /// Self URL of the record, when the server sent one.
    pub url: Option<String>,
}

// ── Entity ──────────────────────────────────────────────────────────

/// In-memory image of one remote record.
#[derive(Debug, Clone)]
pub struct SObject {
    describe: &'static SObjectType,
    pub id: Option<String>,
    pub attributes: Attributes,
    values: HashMap<&'static str, FieldValue>,
    modified: HashSet<&'static str>,
}

impl PartialEq for SObject {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.describe, other.describe)
            && self.id == other.id
            && self.attributes == other.attributes
            && self.values == other.values
            && self.modified == other.modified
    }
}

impl SObject {
    /// Fresh entity of the given type: no id, no values, clean dirty set.
    pub fn new(describe: &'static SObjectType) -> Self {
        Self {
            describe,
            id: None,
            attributes: Attributes {
                sobject_type: describe.api_name.to_string(),
                url: None,
            },
            values: HashMap::new(),
            modified: HashSet::new(),
        }
    }

    pub fn describe(&self) -> &'static SObjectType {
        self.describe
    }

    pub fn get(&self, local_name: &str) -> Option<&FieldValue> {
        self.values.get(local_name)
    }

    /// Guarded assignment: stores the value and, when the field is
    /// writable on update, adds its remote name to the dirty set.
    pub fn set(&mut self, local_name: &str, value: FieldValue) -> Result<(), SforceError> {
        let fd = self.field(local_name)?;
        if fd.updateable {
            self.modified.insert(fd.api_name);
        }
        self.values.insert(fd.local_name, value);
        Ok(())
    }

    /// Unguarded assignment: stores the value without touching the dirty
    /// set. Callers that need the field sent under modified-only updates
    /// must call [`Self::mark_modified`].
    pub fn set_untracked(&mut self, local_name: &str, value: FieldValue) -> Result<(), SforceError> {
        let fd = self.field(local_name)?;
        self.values.insert(fd.local_name, value);
        Ok(())
    }

    /// Add the remote names of the given local fields to the dirty set.
    /// Fields without an update-writable descriptor are ignored, keeping
    /// the invariant that the dirty set only ever names updateable fields.
    pub fn mark_modified(&mut self, local_names: &[&str]) {
        for name in local_names {
            if let Some(fd) = self.describe.field(name) {
                if fd.updateable {
                    self.modified.insert(fd.api_name);
                }
            }
        }
    }

    /// Remote names of fields modified since the last sync.
    pub fn modified_fields(&self) -> &HashSet<&'static str> {
        &self.modified
    }

    pub fn clear_modified(&mut self) {
        self.modified.clear();
    }

    fn field(&self, local_name: &str) -> Result<&'static FieldDescriptor, SforceError> {
        self.describe
            .field(local_name)
            .ok_or_else(|| SforceError::UnknownField(format!("{}.{}", self.describe.api_name, local_name)))
    }

    // ── Materialization ─────────────────────────────────────────────

    /// Materialize a raw row into a fresh entity.
    pub fn from_row(describe: &'static SObjectType, row: &Value) -> Result<Self, SforceError> {
        let mut obj = Self::new(describe);
        obj.apply_row(row)?;
        Ok(obj)
    }

    /// Apply a raw row to this entity. Unmapped keys are skipped; nulls
    /// become empty collections on child fields and `Null` elsewhere;
    /// scalars are coerced per descriptor; relations recurse one record
    /// (parent) or one collection (child) at a time. Leaves the dirty set
    /// empty.
    pub fn apply_row(&mut self, row: &Value) -> Result<(), SforceError> {
        let map = row
            .as_object()
            .ok_or_else(|| SforceError::Decode(format!("expected a record object, got {row}")))?;

        for (key, raw) in map {
            if key.eq_ignore_ascii_case("attributes") {
                self.apply_attributes(raw);
                continue;
            }
            let Some(fd) = self.describe.field_by_api_name(key) else {
                trace!("{}: skipping unmapped field {key}", self.describe.api_name);
                continue;
            };
            if fd.field_type == FieldType::Id {
                self.id = raw.as_str().map(str::to_string);
                continue;
            }
            let value = match fd.relation {
                RelationKind::Child => Self::materialize_children(fd, raw)?,
                RelationKind::Parent => {
                    if raw.is_null() {
                        FieldValue::Null
                    } else {
                        let related = related_type(fd)?;
                        FieldValue::Parent(Box::new(Self::from_row(related, raw)?))
                    }
                }
                RelationKind::None => FieldValue::scalar_from_wire(fd.field_type, raw)?,
            };
            self.values.insert(fd.local_name, value);
        }

        self.modified.clear();
        Ok(())
    }

    fn apply_attributes(&mut self, raw: &Value) {
        if let Some(t) = raw.get("type").and_then(Value::as_str) {
            self.attributes.sobject_type = t.to_string();
        }
        if let Some(u) = raw.get("url").and_then(Value::as_str) {
            self.attributes.url = Some(u.to_string());
        }
    }

    /// Child values arrive either as a literal array or as a query page
    /// `{records, done, nextRecordsUrl}`. Page state is preserved so the
    /// executor can drain the remainder.
    fn materialize_children(fd: &FieldDescriptor, raw: &Value) -> Result<FieldValue, SforceError> {
        if raw.is_null() {
            return Ok(FieldValue::Children(Children::empty()));
        }
        let related = related_type(fd)?;
        if let Some(rows) = raw.as_array() {
            let records = rows
                .iter()
                .map(|r| Self::from_row(related, r))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(FieldValue::Children(Children::complete(records)));
        }
        if let Some(rows) = raw.get("records").and_then(Value::as_array) {
            let records = rows
                .iter()
                .map(|r| Self::from_row(related, r))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(FieldValue::Children(Children {
                records,
                done: raw.get("done").and_then(Value::as_bool).unwrap_or(true),
                next_records_url: raw
                    .get("nextRecordsUrl")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }));
        }
        Err(SforceError::Decode(format!(
            "child field {} holds neither an array nor a page: {raw}",
            fd.api_name
        )))
    }

    // ── Serialization ───────────────────────────────────────────────

    /// Serialize to a DML payload keyed by remote field names.
    ///
    /// Scalar inclusion follows the mode table; relations follow the
    /// `send_parents` / `send_children` flags. A parent serialized without
    /// `send_parents` collapses to its first populated external-id field —
    /// unless the `<local>_id` alias field is populated, in which case the
    /// alias already carries the reference and the parent is omitted.
    pub fn to_payload(&self, opts: &SerializeOptions) -> Value {
        let mut out = Map::new();
        for fd in self.describe.fields {
            match fd.relation {
                RelationKind::Child => {
                    if !opts.send_children {
                        continue;
                    }
                    if let Some(FieldValue::Children(children)) = self.values.get(fd.local_name) {
                        let records: Vec<Value> =
                            children.records.iter().map(|c| c.to_payload(opts)).collect();
                        out.insert(fd.api_name.to_string(), json!({ "records": records }));
                    }
                }
                RelationKind::Parent => {
                    let value = self.values.get(fd.local_name);
                    if opts.send_parents {
                        match value {
                            Some(FieldValue::Parent(p)) => {
                                out.insert(fd.api_name.to_string(), p.to_payload(opts));
                            }
                            Some(FieldValue::Null) => {
                                out.insert(fd.api_name.to_string(), Value::Null);
                            }
                            _ => {}
                        }
                    } else if let Some(FieldValue::Parent(p)) = value {
                        if !self.alias_populated(fd.local_name) {
                            if let Some(reference) = p.as_relation_record() {
                                out.insert(fd.api_name.to_string(), reference);
                            }
                        }
                    }
                }
                RelationKind::None => {
                    if !self.mode_includes(fd, opts.mode) {
                        continue;
                    }
                    if fd.field_type == FieldType::Id {
                        if let Some(id) = &self.id {
                            out.insert(fd.api_name.to_string(), json!(id));
                        }
                        continue;
                    }
                    if let Some(value) = self.values.get(fd.local_name) {
                        out.insert(fd.api_name.to_string(), value.scalar_to_wire());
                    }
                }
            }
        }
        Value::Object(out)
    }

    fn mode_includes(&self, fd: &FieldDescriptor, mode: DmlMode) -> bool {
        match mode {
            DmlMode::All => true,
            DmlMode::Insert => fd.createable,
            DmlMode::Update => fd.updateable,
            DmlMode::UpdateModifiedOnly => fd.updateable && self.modified.contains(fd.api_name),
        }
    }

    /// Whether the `<local>_id` alias field carries a value of its own.
    fn alias_populated(&self, parent_local: &str) -> bool {
        let alias = format!("{parent_local}_id");
        matches!(self.values.get(alias.as_str()), Some(v) if !v.is_null())
    }

    /// Reference payload for this record as a relation target: its first
    /// populated external-id field as `{api_name: value}`.
    fn as_relation_record(&self) -> Option<Value> {
        for fd in self.describe.fields {
            if !fd.external_id {
                continue;
            }
            if let Some(v) = self.values.get(fd.local_name) {
                if !v.is_null() {
                    return Some(json!({ fd.api_name: v.scalar_to_wire() }));
                }
            }
        }
        None
    }

    /// Child collections that still have pages to fetch, with the related
    /// type needed to materialize them.
    pub(crate) fn unfinished_children_mut(
        &mut self,
    ) -> Vec<(&'static SObjectType, &mut Children)> {
        let describe = self.describe;
        self.values
            .iter_mut()
            .filter_map(|(local, value)| match value {
                FieldValue::Children(children) if !children.done => {
                    let related = describe.field(local).and_then(|fd| fd.related)?;
                    Some((related(), children))
                }
                _ => None,
            })
            .collect()
    }
}

fn related_type(fd: &FieldDescriptor) -> Result<&'static SObjectType, SforceError> {
    match fd.related {
        Some(factory) => Ok(factory()),
        None => Err(SforceError::Decode(format!(
            "relation field {} has no related type",
            fd.api_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::FieldDescriptor;
    use crate::value::CalendarDate;

    fn account_type() -> &'static SObjectType {
        &ACCOUNT
    }

    fn contact_type() -> &'static SObjectType {
        &CONTACT
    }

    static ACCOUNT: SObjectType = SObjectType::new(
        "Account",
        &[
            FieldDescriptor::id("id", "Id"),
            FieldDescriptor::new("name", "Name", FieldType::Text),
            FieldDescriptor::new("industry", "Industry", FieldType::Picklist),
            FieldDescriptor::new("multi_pick", "MultiPick__c", FieldType::MultiPicklist),
            FieldDescriptor::new("founded", "Founded__c", FieldType::Date),
            FieldDescriptor::new("account_number", "AccountNumber__c", FieldType::Text)
                .external_id(),
            FieldDescriptor::new("legacy_code", "LegacyCode__c", FieldType::Text).create_only(),
            FieldDescriptor::child("children", "Children", contact_type),
        ],
    );

    static CONTACT: SObjectType = SObjectType::new(
        "Contact",
        &[
            FieldDescriptor::id("id", "Id"),
            FieldDescriptor::new("last_name", "LastName", FieldType::Text),
            FieldDescriptor::new("account_id", "AccountId", FieldType::Text),
            FieldDescriptor::parent("account", "Account", account_type),
        ],
    );

    #[test]
    fn materialize_scenario() {
        // The canonical mixed row: scalar, null, multiselect, paged children.
        let row = json!({
            "attributes": {"type": "Account", "url": "/services/data/v56.0/sobjects/Account/001x"},
            "Id": "001x",
            "Name": "Acme",
            "Industry": null,
            "MultiPick__c": "A;B",
            "Children": {"records": [{"Id": "1", "LastName": "Smith"}], "done": true}
        });
        let obj = SObject::from_row(&ACCOUNT, &row).unwrap();

        assert_eq!(obj.id.as_deref(), Some("001x"));
        assert_eq!(obj.attributes.sobject_type, "Account");
        assert_eq!(obj.get("name"), Some(&FieldValue::Text("Acme".into())));
        assert_eq!(obj.get("industry"), Some(&FieldValue::Null));
        assert_eq!(
            obj.get("multi_pick"),
            Some(&FieldValue::MultiPicklist(vec!["A".into(), "B".into()]))
        );
        match obj.get("children") {
            Some(FieldValue::Children(ch)) => {
                assert!(ch.done);
                assert_eq!(ch.records.len(), 1);
                assert_eq!(ch.records[0].id.as_deref(), Some("1"));
            }
            other => panic!("expected children, got {other:?}"),
        }
        assert!(obj.modified_fields().is_empty());
    }

    #[test]
    fn materialize_is_idempotent() {
        let row = json!({"Id": "001x", "Name": "Acme", "MultiPick__c": "A;B"});
        let first = SObject::from_row(&ACCOUNT, &row).unwrap();
        let second = SObject::from_row(&ACCOUNT, &row).unwrap();
        assert_eq!(first, second);
        assert!(first.modified_fields().is_empty());
    }

    #[test]
    fn unmapped_keys_are_skipped() {
        let row = json!({"Name": "Acme", "NotAField__c": 42});
        let obj = SObject::from_row(&ACCOUNT, &row).unwrap();
        assert_eq!(obj.get("name"), Some(&FieldValue::Text("Acme".into())));
    }

    #[test]
    fn null_child_becomes_empty_collection() {
        let obj = SObject::from_row(&ACCOUNT, &json!({"Children": null})).unwrap();
        assert_eq!(obj.get("children"), Some(&FieldValue::Children(Children::empty())));
    }

    #[test]
    fn literal_child_array_is_accepted() {
        let obj = SObject::from_row(&ACCOUNT, &json!({"Children": [{"Id": "1"}, {"Id": "2"}]})).unwrap();
        match obj.get("children") {
            Some(FieldValue::Children(ch)) => {
                assert!(ch.done);
                assert_eq!(ch.records.len(), 2);
            }
            other => panic!("expected children, got {other:?}"),
        }
    }

    #[test]
    fn parent_rows_materialize_recursively() {
        let row = json!({"LastName": "Smith", "Account": {"Id": "001x", "Name": "Acme"}});
        let obj = SObject::from_row(&CONTACT, &row).unwrap();
        match obj.get("account") {
            Some(FieldValue::Parent(p)) => {
                assert_eq!(p.id.as_deref(), Some("001x"));
                assert_eq!(p.get("name"), Some(&FieldValue::Text("Acme".into())));
            }
            other => panic!("expected parent, got {other:?}"),
        }
    }

    #[test]
    fn guarded_set_tracks_updateable_fields() {
        let mut obj = SObject::new(&ACCOUNT);
        obj.set("name", FieldValue::Text("Acme".into())).unwrap();
        assert_eq!(
            obj.modified_fields().iter().copied().collect::<Vec<_>>(),
            vec!["Name"]
        );

        // Insert-only fields never enter the dirty set.
        obj.clear_modified();
        obj.set("legacy_code", FieldValue::Text("L-1".into())).unwrap();
        assert!(obj.modified_fields().is_empty());
    }

    #[test]
    fn untracked_set_requires_mark_modified() {
        let mut obj = SObject::new(&ACCOUNT);
        obj.set_untracked("name", FieldValue::Text("Acme".into())).unwrap();
        assert!(obj.modified_fields().is_empty());

        obj.mark_modified(&["name", "legacy_code", "missing"]);
        assert_eq!(
            obj.modified_fields().iter().copied().collect::<Vec<_>>(),
            vec!["Name"]
        );
    }

    #[test]
    fn unknown_field_is_an_error() {
        let mut obj = SObject::new(&ACCOUNT);
        assert!(matches!(
            obj.set("bogus", FieldValue::Null),
            Err(SforceError::UnknownField(_))
        ));
    }

    #[test]
    fn modified_only_payload_is_exact() {
        let mut obj = SObject::new(&ACCOUNT);
        obj.set("name", FieldValue::Text("Acme".into())).unwrap();
        obj.set_untracked("industry", FieldValue::Text("Retail".into())).unwrap();

        let payload = obj.to_payload(&SerializeOptions::new(DmlMode::UpdateModifiedOnly));
        assert_eq!(payload, json!({"Name": "Acme"}));
    }

    #[test]
    fn mode_table_governs_inclusion() {
        let mut obj = SObject::new(&ACCOUNT);
        obj.set("name", FieldValue::Text("Acme".into())).unwrap();
        obj.set("legacy_code", FieldValue::Text("L-1".into())).unwrap();

        let insert = obj.to_payload(&SerializeOptions::new(DmlMode::Insert));
        assert_eq!(insert, json!({"Name": "Acme", "LegacyCode__c": "L-1"}));

        // Insert-only fields are excluded from every update flavor.
        let update = obj.to_payload(&SerializeOptions::new(DmlMode::Update));
        assert_eq!(update, json!({"Name": "Acme"}));
    }

    #[test]
    fn round_trip_preserves_mapped_values() {
        let row = json!({
            "Id": "001x",
            "Name": "Acme",
            "Industry": "Retail",
            "MultiPick__c": "A;B",
            "Founded__c": "1999-12-31"
        });
        let obj = SObject::from_row(&ACCOUNT, &row).unwrap();
        assert_eq!(
            obj.get("founded"),
            Some(&FieldValue::Date(CalendarDate::new(1999, 12, 31)))
        );

        let all = obj.to_payload(&SerializeOptions::new(DmlMode::All));
        assert_eq!(all, row);
    }

    #[test]
    fn parent_collapses_to_external_id() {
        let mut parent = SObject::new(&ACCOUNT);
        parent.set("account_number", FieldValue::Text("ACC-9".into())).unwrap();
        let mut obj = SObject::new(&CONTACT);
        obj.set("last_name", FieldValue::Text("Smith".into())).unwrap();
        obj.set_untracked("account", FieldValue::Parent(Box::new(parent))).unwrap();

        let payload = obj.to_payload(&SerializeOptions::new(DmlMode::Insert));
        assert_eq!(
            payload,
            json!({"LastName": "Smith", "Account": {"AccountNumber__c": "ACC-9"}})
        );
    }

    #[test]
    fn populated_alias_suppresses_parent_reference() {
        let mut parent = SObject::new(&ACCOUNT);
        parent.set("account_number", FieldValue::Text("ACC-9".into())).unwrap();
        let mut obj = SObject::new(&CONTACT);
        obj.set("account_id", FieldValue::Text("001x".into())).unwrap();
        obj.set_untracked("account", FieldValue::Parent(Box::new(parent))).unwrap();

        let payload = obj.to_payload(&SerializeOptions::new(DmlMode::Insert));
        assert_eq!(payload, json!({"AccountId": "001x"}));
    }

    #[test]
    fn parent_without_external_id_is_omitted() {
        let mut parent = SObject::new(&ACCOUNT);
        parent.set("name", FieldValue::Text("Acme".into())).unwrap();
        let mut obj = SObject::new(&CONTACT);
        obj.set_untracked("account", FieldValue::Parent(Box::new(parent))).unwrap();

        let payload = obj.to_payload(&SerializeOptions::new(DmlMode::Insert));
        assert_eq!(payload, json!({}));
    }

    #[test]
    fn send_parents_serializes_in_full() {
        let mut parent = SObject::new(&ACCOUNT);
        parent.set("name", FieldValue::Text("Acme".into())).unwrap();
        let mut obj = SObject::new(&CONTACT);
        obj.set_untracked("account", FieldValue::Parent(Box::new(parent))).unwrap();

        let mut opts = SerializeOptions::new(DmlMode::All);
        opts.send_parents = true;
        let payload = obj.to_payload(&opts);
        assert_eq!(payload["Account"]["Name"], json!("Acme"));
    }

    #[test]
    fn send_children_serializes_records() {
        let mut child = SObject::new(&CONTACT);
        child.set("last_name", FieldValue::Text("Smith".into())).unwrap();
        let mut obj = SObject::new(&ACCOUNT);
        obj.set_untracked("children", FieldValue::Children(Children::complete(vec![child])))
            .unwrap();

        let mut opts = SerializeOptions::new(DmlMode::All);
        opts.send_children = true;
        let payload = obj.to_payload(&opts);
        assert_eq!(payload["Children"]["records"][0]["LastName"], json!("Smith"));

        // Without the flag children never appear.
        let without = obj.to_payload(&SerializeOptions::new(DmlMode::All));
        assert_eq!(without, json!({}));
    }
}
