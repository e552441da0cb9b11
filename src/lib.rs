//! Typed client for a Salesforce-style REST record API.
//!
//! Maps in-memory entities onto remote records through static
//! field-descriptor tables (normally generated from remote metadata),
//! tracks which fields changed so updates send exactly the delta, batches
//! heterogeneous operations into single round trips, follows paginated
//! result sets, and folds the server's assorted failure shapes into one
//! error taxonomy.
//!
//! ```ignore
//! use openerp_sforce::{Rest, QueryOptions, SObject, FieldValue};
//!
//! let rest = Rest::with_token("https://acme.my.salesforce.com", token);
//! let mut accounts = rest
//!     .query_objects(&ACCOUNT, "SELECT Id, Name FROM Account", &QueryOptions::default())
//!     .await?;
//!
//! let acct = &mut accounts[0];
//! acct.set("name", FieldValue::Text("Acme Corp".into()))?;
//! rest.update(acct, &Default::default()).await?;
//! ```

pub mod composite;
pub mod describe;
pub mod dml;
pub mod error;
pub mod headers;
pub mod object;
pub mod query;
pub mod rest;
pub mod value;

pub use composite::{
    BatchRequest, BatchResponse, BatchResult, Composite, CompositeBatch, CompositeRequest,
    CompositeResult, CompositeSubResponse,
};
pub use describe::{FieldDescriptor, FieldType, RelationKind, SObjectType};
pub use dml::UpdateOptions;
pub use error::{BatchFailure, ErrorDetail, ErrorKind, NormalizedError, SforceError};
pub use headers::{
    CallOptions, ContentEncoding, DuplicateRuleOptions, PackageVersion, RequestHeaders,
};
pub use object::{Attributes, DmlMode, SObject, SerializeOptions};
pub use query::{PageDepth, QueryOptions};
pub use rest::{
    DmlResponse, HttpResponse, HttpTransport, Method, QueryResponse, Rest, RestConfig, Transport,
    DEFAULT_API_VERSION,
};
pub use value::{CalendarDate, Children, FieldValue};
