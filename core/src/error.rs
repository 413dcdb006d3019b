use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema {path} not found")]
    SchemaFileNotFound { path: String, source: std::io::Error },

    #[error("Schema {path} contains invalid configuration")]
    SchemaFileInvalid { path: String, source: serde_yaml::Error },

    #[error("Schema object contains invalid configuration")]
    SchemaObjectInvalid { source: serde_json::Error },

    #[error("Schema is invalid - {reason}")]
    SchemaInvalid { reason: String },
}
