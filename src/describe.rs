//! Static field-descriptor tables.
//!
//! Each remote sobject type is described by one [`SObjectType`] table,
//! normally emitted by the schema generator from remote metadata and
//! registered as a `static`. Descriptors are immutable once built; the
//! only lazy piece is the lowercase remote-name lookup map, which is
//! computed once per type and safe to race on (idempotent).

use std::collections::HashMap;
use std::sync::OnceLock;

/// Scalar type of a field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Record id. Routed to [`crate::object::SObject::id`], not the value map.
    Id,
    Text,
    Boolean,
    Int,
    Double,
    Picklist,
    /// `;`-joined string on the wire, `Vec<String>` in memory.
    MultiPicklist,
    /// `YYYY-MM-DD`, no time or zone.
    Date,
    /// ISO-8601 timestamp.
    DateTime,
    /// Relation field; the value is another record (or a collection of them).
    Reference,
}

/// How a field relates to other records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    None,
    /// Single nested record (lookup / master-detail).
    Parent,
    /// Nested collection, delivered literally or as a query page.
    Child,
}

/// Static metadata for one field.
#[derive(Debug)]
pub struct FieldDescriptor {
    /// Name used in the local value map (generator output, snake_case).
    pub local_name: &'static str,
    /// Remote field name as it appears on the wire.
    pub api_name: &'static str,
    /// May be sent on insert.
    pub createable: bool,
    /// May be sent on update; only these fields participate in dirty tracking.
    pub updateable: bool,
    /// Usable to address the record from a relation payload.
    pub external_id: bool,
    pub relation: RelationKind,
    pub field_type: FieldType,
    /// Descriptor table of the related type, for relation fields.
    pub related: Option<fn() -> &'static SObjectType>,
}

impl FieldDescriptor {
    /// Plain scalar field, writable on insert and update.
    pub const fn new(
        local_name: &'static str,
        api_name: &'static str,
        field_type: FieldType,
    ) -> Self {
        Self {
            local_name,
            api_name,
            createable: true,
            updateable: true,
            external_id: false,
            relation: RelationKind::None,
            field_type,
            related: None,
        }
    }

    /// Record id field: never writable.
    pub const fn id(local_name: &'static str, api_name: &'static str) -> Self {
        Self::new(local_name, api_name, FieldType::Id).read_only()
    }

    /// Parent relation (single nested record).
    pub const fn parent(
        local_name: &'static str,
        api_name: &'static str,
        related: fn() -> &'static SObjectType,
    ) -> Self {
        let mut fd = Self::new(local_name, api_name, FieldType::Reference).read_only();
        fd.relation = RelationKind::Parent;
        fd.related = Some(related);
        fd
    }

    /// Child relation (nested collection).
    pub const fn child(
        local_name: &'static str,
        api_name: &'static str,
        related: fn() -> &'static SObjectType,
    ) -> Self {
        let mut fd = Self::new(local_name, api_name, FieldType::Reference).read_only();
        fd.relation = RelationKind::Child;
        fd.related = Some(related);
        fd
    }

    /// Writable on insert only (e.g. a master-detail id).
    pub const fn create_only(mut self) -> Self {
        self.createable = true;
        self.updateable = false;
        self
    }

    /// Never writable (formulas, system fields).
    pub const fn read_only(mut self) -> Self {
        self.createable = false;
        self.updateable = false;
        self
    }

    /// Mark as an external id.
    pub const fn external_id(mut self) -> Self {
        self.external_id = true;
        self
    }
}

/// Descriptor table for one remote sobject type.
#[derive(Debug)]
pub struct SObjectType {
    /// Remote type name (e.g. `Account`).
    pub api_name: &'static str,
    pub fields: &'static [FieldDescriptor],
    name_map: OnceLock<HashMap<String, usize>>,
}

impl SObjectType {
    pub const fn new(api_name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { api_name, fields, name_map: OnceLock::new() }
    }

    /// Look up a descriptor by local name.
    pub fn field(&self, local_name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|fd| fd.local_name == local_name)
    }

    /// Look up a descriptor by remote name, case-insensitively.
    pub fn field_by_api_name(&self, api_name: &str) -> Option<&FieldDescriptor> {
        self.name_map()
            .get(&api_name.to_ascii_lowercase())
            .map(|&i| &self.fields[i])
    }

    /// Lowercase remote name → field index. Built on first use; concurrent
    /// first uses compute the same map and one of them wins.
    fn name_map(&self) -> &HashMap<String, usize> {
        self.name_map.get_or_init(|| {
            self.fields
                .iter()
                .enumerate()
                .map(|(i, fd)| (fd.api_name.to_ascii_lowercase(), i))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static WIDGET: SObjectType = SObjectType::new(
        "Widget__c",
        &[
            FieldDescriptor::id("id", "Id"),
            FieldDescriptor::new("name", "Name", FieldType::Text),
            FieldDescriptor::new("sku", "SKU__c", FieldType::Text).external_id(),
            FieldDescriptor::new("weight", "Weight__c", FieldType::Double).create_only(),
        ],
    );

    #[test]
    fn lookup_by_local_name() {
        assert_eq!(WIDGET.field("name").map(|f| f.api_name), Some("Name"));
        assert!(WIDGET.field("nope").is_none());
    }

    #[test]
    fn lookup_by_api_name_is_case_insensitive() {
        assert_eq!(WIDGET.field_by_api_name("sku__C").map(|f| f.local_name), Some("sku"));
        assert_eq!(WIDGET.field_by_api_name("NAME").map(|f| f.local_name), Some("name"));
        assert!(WIDGET.field_by_api_name("Other__c").is_none());
    }

    #[test]
    fn name_map_is_idempotent() {
        // Two builds observe the same content.
        let first: Vec<_> = {
            let mut v: Vec<_> = WIDGET.name_map().iter().map(|(k, &i)| (k.clone(), i)).collect();
            v.sort();
            v
        };
        let second: Vec<_> = {
            let mut v: Vec<_> = WIDGET.name_map().iter().map(|(k, &i)| (k.clone(), i)).collect();
            v.sort();
            v
        };
        assert_eq!(first, second);
    }

    #[test]
    fn mutability_helpers() {
        let id = WIDGET.field("id").unwrap();
        assert!(!id.createable);
        assert!(!id.updateable);
        let weight = WIDGET.field("weight").unwrap();
        assert!(weight.createable);
        assert!(!weight.updateable);
    }
}
