use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiftError {

    #[error("File {filename} matched no side's file patterns")]
    FileUnclassified { filename: String },

    #[error("Side {side} has no files to process")]
    SideEmpty { side: String },

    #[error("Side {side} declares an invalid file pattern '{pattern}'")]
    BadPattern { side: String, pattern: String },

    #[error("Unable to read {path}: {cause}")]
    ReadFailed { path: String, cause: String },

    #[error("File {path} contains no data rows")]
    EmptyFile { path: String },

    #[error("Unable to write {path}: {cause}")]
    WriteFailed { path: String, cause: String },

    #[error("The key role '{role}' resolved to no column of {path} on side {side}")]
    KeyRoleUnresolved { role: String, side: String, path: String },

    #[error("The task was canceled")]
    Canceled,

    #[error("The task exceeded its wall-clock budget")]
    TimedOut,

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}
