//! Error types for the quicksave library
//!
//! Every failure a lifecycle operation can report is a variant of
//! [`QuicksaveError`]. Operations abort on the first error and nothing is
//! persisted, so callers can treat every variant as terminal for the
//! operation that raised it.

use crate::types::KeyKind;
use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the quicksave library
pub type Result<T> = std::result::Result<T, QuicksaveError>;

/// Main error type for all quicksave operations
#[derive(Debug, Error)]
pub enum QuicksaveError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// A key or alias does not exist
    #[error("The requested {kind} does not exist in this database ({name})")]
    UnknownKey {
        /// Which table was searched
        kind: KeyKind,
        /// The name that failed to resolve
        name: String,
    },

    /// A key would clobber an existing authoritative key
    #[error("The provided name is already in use by a {kind} ({name})")]
    DuplicateKey {
        /// Which table holds the existing key
        kind: KeyKind,
        /// The conflicting name
        name: String,
    },

    /// The file path is already registered
    #[error("Filepath {path:?} is registered to file key {file_key}")]
    DuplicateFilepath {
        /// Absolute path that was being registered
        path: PathBuf,
        /// File key the path already resolves to
        file_key: String,
    },

    /// The content already exists as a state of this file key
    #[error("Duplicate of state {state}")]
    DuplicateState {
        /// Local name of the state holding identical content
        state: String,
    },

    /// Attempted to use a reserved name outside internal bookkeeping
    #[error("Cannot use reserved {kind} name {name}")]
    ReservedKey {
        /// Which namespace the name is reserved in
        kind: KeyKind,
        /// The reserved name
        name: String,
    },

    /// Every alias in a batch collided
    #[error("None of the provided aliases were available")]
    NoAliasAvailable,

    /// Tried to delete an authoritative key through the alias path
    #[error("{name} is a {kind}, not an alias")]
    CannotDeleteAuthoritative {
        /// Key kind
        kind: KeyKind,
        /// The authoritative name
        name: String,
    },

    /// Tried to delete an alias through the key deletion path
    #[error("{name} is an alias, not a {kind}")]
    CannotDeleteAlias {
        /// Key kind
        kind: KeyKind,
        /// The alias name
        name: String,
    },

    /// Revert target matches the current content
    #[error("The file is already in the requested state ({state})")]
    AlreadyInState {
        /// Local name of the matching state
        state: String,
    },

    /// No file key was given and none could be inferred from the path
    #[error("Could not infer the file key for {path:?}")]
    CannotInferKey {
        /// The path inference was attempted for
        path: PathBuf,
    },

    /// Manifest signature mismatch or a structural invariant violation
    #[error("Corrupt database: {0}")]
    CorruptDatabase(String),

    /// Clean invoked without any pass selected
    #[error("No clean operation selected")]
    NoCleanOperationSelected,

    /// Recover invoked with an empty trash slot
    #[error("There is no data stored in the ~trash file key")]
    NothingToRecover,

    /// A file the operation depends on is missing
    #[error("File not found: {path:?}")]
    MissingFile {
        /// The missing path
        path: PathBuf,
    },

    /// Another process holds the database lock
    #[error("Database is locked (in use?): {0:?}")]
    DatabaseLocked(PathBuf),

    /// No database has been configured
    #[error("No database loaded")]
    NoDatabase,

    /// Path has no usable file name
    #[error("Invalid path: {0:?}")]
    InvalidPath(PathBuf),

    /// A configuration key to be cleared is not set
    #[error("The requested key ({key}) is not set in the {scope} configuration")]
    ConfigKeyNotSet {
        /// Configuration key
        key: String,
        /// "global" or "database"
        scope: &'static str,
    },

    /// Argument combination does not map to an operation
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl QuicksaveError {
    /// Create an unknown file key error
    pub fn unknown_file(name: impl Into<String>) -> Self {
        QuicksaveError::UnknownKey { kind: KeyKind::File, name: name.into() }
    }

    /// Create an unknown state key error
    pub fn unknown_state(name: impl Into<String>) -> Self {
        QuicksaveError::UnknownKey { kind: KeyKind::State, name: name.into() }
    }

    /// Create a corrupt database error with a custom message
    pub fn corrupt(msg: impl Into<String>) -> Self {
        QuicksaveError::CorruptDatabase(msg.into())
    }

    /// Create an invalid arguments error with a custom message
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        QuicksaveError::InvalidArguments(msg.into())
    }

    /// Check if this error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            QuicksaveError::CorruptDatabase(_) | QuicksaveError::Json(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            QuicksaveError::MissingFile { path } => {
                format!(
                    "File {:?} is missing. The database may have been modified externally; \
                     run 'quicksave clean --clean-all' to repair it.",
                    path
                )
            }
            QuicksaveError::Io(e) => {
                format!(
                    "{}. The database may have been modified externally; \
                     run 'quicksave clean --clean-all' to repair it.",
                    e
                )
            }
            QuicksaveError::DuplicateFilepath { .. } => {
                format!("{} (use --ignore-filepath to override this behavior)", self)
            }
            QuicksaveError::DuplicateState { .. } => {
                format!(
                    "{} (use --allow-duplicate to override this behavior, or 'quicksave alias' to create aliases)",
                    self
                )
            }
            QuicksaveError::CannotDeleteAuthoritative { kind: KeyKind::File, .. } => {
                format!("{}. Use 'quicksave delete-key <file key>' to delete file keys", self)
            }
            QuicksaveError::CannotDeleteAuthoritative { kind: KeyKind::State, .. } => {
                format!("{}. Use 'quicksave delete-key <file key> <state key>' to delete state keys", self)
            }
            QuicksaveError::CannotDeleteAlias { kind: KeyKind::File, .. } => {
                format!("{}. Use 'quicksave alias -d <file alias>' to delete it", self)
            }
            QuicksaveError::CannotDeleteAlias { kind: KeyKind::State, .. } => {
                format!("{}. Use 'quicksave alias -d <state alias> <file key>' to delete it", self)
            }
            QuicksaveError::CannotInferKey { .. } => {
                format!("{}. Please set one explicitly with the -k option", self)
            }
            QuicksaveError::NoDatabase => {
                "No database loaded. Please run 'quicksave init <path>' to create or load a database".to_string()
            }
            QuicksaveError::CorruptDatabase(_) => {
                format!("{}. Use 'quicksave init <path>' to initialize a new database", self)
            }
            QuicksaveError::NoCleanOperationSelected => {
                "No action taken. Set at least one of the flags when using 'quicksave clean'".to_string()
            }
            _ => self.to_string(),
        }
    }
}
