use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("record of type {entity} is missing key field {field}")]
    MissingKeyField { entity: String, field: String },

    #[error("incomplete key for {0}")]
    IncompleteKey(String),
}
