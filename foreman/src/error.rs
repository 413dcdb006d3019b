use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {

    #[error("Task {task_id} was not found")]
    TaskNotFound { task_id: String },

    #[error("Task {task_id} has not completed - no result is available")]
    TaskIncomplete { task_id: String },

    #[error("Task {task_id} is still {state} and cannot be removed")]
    TaskNotTerminal { task_id: String, state: String },

    #[error("File type of {filename} is not allowed")]
    UnsupportedType { filename: String },

    #[error("Unable to decode the data for {filename}")]
    DecodeFailed { filename: String },

    #[error("File {filename} exceeds the upload limit of {limit} bytes")]
    UploadTooLarge { filename: String, limit: u64 },

    #[error("Config {path} not found")]
    ConfigNotFound { path: String, source: std::io::Error },

    #[error("Config {path} contains invalid configuration")]
    ConfigInvalid { path: String, source: serde_yaml::Error },

    #[error("Tool {tool} is not known")]
    UnknownTool { tool: String },

    #[error("Invalid arguments for {tool}: {reason}")]
    BadArguments { tool: String, reason: String },

    #[error(transparent)]
    SchemaError(#[from] core_lib::error::SchemaError),

    #[error(transparent)]
    SiftError(#[from] sift::SiftError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl ServiceError {
    ///
    /// The stable error kind surfaced in tool-call error envelopes.
    ///
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::TaskNotFound { .. } => "TaskNotFound",
            ServiceError::TaskIncomplete { .. } => "TaskIncomplete",
            ServiceError::TaskNotTerminal { .. } => "TaskIncomplete",
            ServiceError::UnsupportedType { .. } => "UnsupportedType",
            ServiceError::DecodeFailed { .. } => "DecodeFailed",
            ServiceError::UploadTooLarge { .. } => "UploadTooLarge",
            ServiceError::ConfigNotFound { .. } => "ConfigNotFound",
            ServiceError::ConfigInvalid { .. } => "ConfigInvalid",
            ServiceError::UnknownTool { .. } => "UnknownTool",
            ServiceError::BadArguments { .. } => "BadArguments",
            ServiceError::SchemaError(_) => "SchemaInvalid",
            ServiceError::SiftError(err) => match err {
                sift::SiftError::FileUnclassified { .. } => "FileUnclassified",
                sift::SiftError::SideEmpty { .. } => "FileUnclassified",
                sift::SiftError::EmptyFile { .. } => "EmptyFile",
                sift::SiftError::ReadFailed { .. } => "ReadFailed",
                sift::SiftError::KeyRoleUnresolved { .. } => "KeyRoleUnresolved",
                sift::SiftError::TimedOut => "TimedOut",
                _ => "TaskFailed",
            },
            ServiceError::IOError(_) => "IOError",
        }
    }
}
