pub mod error;
pub mod field_value;
pub mod ids;
pub mod model;
pub mod operations;
pub mod record;

pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use model::{EntityModel, KeyStrategy, Model, Reference};
pub use operations::{OperationBatch, OperationKind, PendingOperation};
pub use record::{FieldMap, Identity, Record};
