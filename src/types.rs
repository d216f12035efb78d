//! Core data types used throughout the quicksave library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Identity**: [`KeyKind`], [`StateId`] - which namespace a key lives in and
//!   the composite identity of a state-key
//! - **Table entries**: [`Entry`], [`Lineage`], [`Snapshot`] - authoritative
//!   payloads and alias links
//! - **Operations**: [`RegisterOptions`], [`SaveOptions`], [`RevertOptions`],
//!   [`DeleteOptions`], [`CleanOptions`] - operation parameters
//! - **Results**: [`RegisterResult`], [`SaveResult`], [`CleanReport`], ... -
//!   what an operation actually did
//!
//! ## Examples
//!
//! ```rust
//! use quicksave::types::{SaveOptions, StateId};
//!
//! let options = SaveOptions {
//!     aliases: vec!["before-refactor".to_string()],
//!     ..Default::default()
//! };
//! assert!(!options.force);
//!
//! let id = StateId::new("notes_FK1", "notes_SK1");
//! assert_eq!(id.to_string(), "notes_FK1:notes_SK1");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// The two key namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// File-keys name lineages
    File,
    /// State-keys name snapshots within a lineage
    State,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::File => write!(f, "file key"),
            KeyKind::State => write!(f, "state key"),
        }
    }
}

/// Composite identity of a state-key: the owning file-key and a local name
///
/// Ordering is by owner, then by local name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId {
    /// Authoritative file-key owning this state
    pub owner: String,
    /// Name local to the owner
    pub name: String,
}

impl StateId {
    /// Create a new state identity
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self { owner: owner.into(), name: name.into() }
    }

    /// The same local name under a different owner
    pub fn with_owner(&self, owner: &str) -> Self {
        Self::new(owner, self.name.clone())
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.name)
    }
}

/// A name table entry: either an authoritative payload or a link to another key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry<K, P> {
    /// Holds real data
    Authoritative(P),
    /// Points at another key of the same table
    Alias(K),
}

impl<K, P> Entry<K, P> {
    /// Whether this entry holds a payload
    pub fn is_authoritative(&self) -> bool {
        matches!(self, Entry::Authoritative(_))
    }

    /// The payload, if authoritative
    pub fn payload(&self) -> Option<&P> {
        match self {
            Entry::Authoritative(payload) => Some(payload),
            Entry::Alias(_) => None,
        }
    }

    /// The direct link target, if an alias
    pub fn alias_target(&self) -> Option<&K> {
        match self {
            Entry::Alias(target) => Some(target),
            Entry::Authoritative(_) => None,
        }
    }
}

/// Payload of an authoritative file-key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// Storage folder, relative to the database root
    pub folder: String,
    /// Reverse index of data files stored under `folder`
    pub datafiles: BTreeSet<String>,
}

impl Lineage {
    /// Create an empty lineage stored under `folder`
    pub fn new(folder: impl Into<String>) -> Self {
        Self { folder: folder.into(), datafiles: BTreeSet::new() }
    }
}

/// Payload of an authoritative state-key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Data file name inside the owner's folder
    pub datafile: String,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// A snapshot stored in `datafile`, taken now
    pub fn new(datafile: impl Into<String>) -> Self {
        Self { datafile: datafile.into(), created_at: Utc::now() }
    }
}

/// Options for registering a new file
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// User file aliases (best effort)
    pub file_aliases: Vec<String>,
    /// User aliases for the initial state (best effort)
    pub state_aliases: Vec<String>,
    /// Register even if the path already names a file-key
    pub allow_duplicate_path: bool,
}

/// Options for saving a new state
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Explicit file-key; inferred from the path when `None`
    pub file_key: Option<String>,
    /// User aliases for the new state (best effort)
    pub aliases: Vec<String>,
    /// Overwrite existing aliases instead of skipping them
    pub force: bool,
    /// Save even when identical content already exists
    pub allow_duplicate: bool,
}

/// Options for reverting a file
#[derive(Debug, Clone)]
pub struct RevertOptions {
    /// Explicit file-key; inferred from the path when `None`
    pub file_key: Option<String>,
    /// Preserve the current content under `~stash`
    pub stash: bool,
    /// Revert even if the file is already in the requested state
    pub force: bool,
}

impl Default for RevertOptions {
    fn default() -> Self {
        Self { file_key: None, stash: true, force: false }
    }
}

/// Options for deleting a file-key or state-key
#[derive(Debug, Clone)]
pub struct DeleteOptions {
    /// Move the deleted key into the `~trash` slot instead of destroying it
    pub save_to_trash: bool,
    /// Also drop aliases of the `~trash` entry being overwritten
    pub clean_trash_aliases: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self { save_to_trash: true, clean_trash_aliases: false }
    }
}

/// Which integrity passes `clean` should run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanOptions {
    /// Remove states whose owner is not an authoritative file-key
    pub orphan_states: bool,
    /// Remove aliases that no longer resolve
    pub dangling_aliases: bool,
    /// Recompute every lineage's data file index
    pub rebuild_index: bool,
    /// Reconcile the manifest against the directory tree
    pub walk: bool,
    /// Purge `~trash` file and state slots
    pub trash: bool,
    /// Collapse states with identical content
    pub deduplicate: bool,
}

impl CleanOptions {
    /// Every pass enabled
    pub fn all() -> Self {
        Self {
            orphan_states: true,
            dangling_aliases: true,
            rebuild_index: true,
            walk: true,
            trash: true,
            deduplicate: true,
        }
    }

    /// Whether no pass is selected
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of registering a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResult {
    /// The freshly minted file-key
    pub file_key: String,
    /// File aliases actually applied
    pub file_aliases: Vec<String>,
    /// The initial state-key
    pub state_key: String,
    /// State aliases actually applied (short hash and user aliases)
    pub state_aliases: Vec<String>,
    /// Full content hash, also registered as a state alias
    pub hash: String,
}

/// Result of saving a state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    /// Authoritative file-key the state was saved under
    pub file_key: String,
    /// Whether the file-key was inferred from the path
    pub inferred: bool,
    /// The new state-key
    pub state_key: String,
    /// State aliases actually applied
    pub aliases: Vec<String>,
    /// Full content hash
    pub hash: String,
}

/// Result of reverting a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertResult {
    /// Authoritative file-key
    pub file_key: String,
    /// Whether the file-key was inferred from the path
    pub inferred: bool,
    /// Authoritative state the file now matches
    pub state: String,
    /// Whether the previous content was preserved under `~stash`
    pub stashed: bool,
}

/// Result of an alias operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AliasOutcome {
    /// An alias was created or repointed
    Created {
        /// The alias name
        link: String,
        /// The authoritative key it resolves to
        target: String,
        /// Owning file-key for state aliases
        file_key: Option<String>,
    },
    /// An alias was removed
    Deleted {
        /// The alias name
        link: String,
        /// Owning file-key for state aliases
        file_key: Option<String>,
    },
}

/// Result of deleting a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    /// File-key that was deleted, or that owned the deleted state
    pub file_key: String,
    /// Deleted state-key, for state deletions
    pub state: Option<String>,
    /// Whether the data was kept in `~trash`
    pub trashed: bool,
}

/// Result of recovering `~trash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverResult {
    /// The newly minted file-key
    pub file_key: String,
    /// Aliases carried over from `~trash`
    pub migrated: Vec<String>,
    /// User aliases actually applied
    pub aliases: Vec<String>,
}

/// Result of a status check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    /// Authoritative file-key
    pub file_key: String,
    /// Whether the file-key was inferred from the path
    pub inferred: bool,
    /// State matching the current content, if any
    pub state: Option<String>,
}

/// One row of a key listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Key or alias name (local name for states)
    pub name: String,
    /// Direct link target when the row is an alias
    pub alias_of: Option<String>,
}

/// Details of a file-key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDetails {
    /// Authoritative file-key
    pub file_key: String,
    /// Absolute storage folder
    pub folder: PathBuf,
    /// Aliases resolving to this key
    pub aliases: Vec<String>,
    /// Authoritative states owned by this key
    pub states: Vec<String>,
    /// Size of the data file index
    pub datafiles: usize,
}

/// Details of a state-key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDetails {
    /// Owning file-key
    pub file_key: String,
    /// Authoritative state name
    pub state: String,
    /// Absolute data file path
    pub datafile: PathBuf,
    /// Data file size in bytes
    pub size: u64,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
    /// Aliases resolving to this state
    pub aliases: Vec<String>,
}

/// Result of `show`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShowResult {
    /// A file-key was shown
    File(FileDetails),
    /// A state-key was shown
    State(StateDetails),
}

/// A configuration key with its values at both tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Configuration key
    pub key: String,
    /// Value in the global configuration file
    pub global: Option<String>,
    /// Value stored in the database manifest (takes precedence)
    pub database: Option<String>,
}

/// Counts from purging `~trash` state slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashStateReport {
    /// Authoritative state-keys removed
    pub keys: usize,
    /// Aliases removed
    pub aliases: usize,
}

/// What `clean` pruned or repaired
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    /// Orphaned states removed
    pub states: Vec<String>,
    /// Dangling file aliases removed
    pub file_aliases: Vec<String>,
    /// Dangling state aliases removed
    pub state_aliases: Vec<String>,
    /// Lineages whose data file index was rebuilt
    pub rebuilt: usize,
    /// Untracked top-level folders removed
    pub prune_folders: Vec<String>,
    /// Untracked files removed from tracked folders
    pub prune_files: Vec<String>,
    /// File-keys removed because their folder is gone
    pub prune_filekeys: Vec<String>,
    /// State-keys removed because their data file is gone
    pub prune_statekeys: Vec<String>,
    /// `~trash` state purge counts
    pub trash_state: Option<TrashStateReport>,
    /// Alias count of the purged `~trash` file-key
    pub trash_file: Option<usize>,
    /// Removed duplicate state mapped to the state it was merged into
    pub deduplicate: BTreeMap<String, String>,
    /// Aliases forwarded by deduplication
    pub forwarded: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl CleanReport {
    /// Whether nothing was pruned or repaired
    pub fn is_clean(&self) -> bool {
        self.states.is_empty()
            && self.file_aliases.is_empty()
            && self.state_aliases.is_empty()
            && self.rebuilt == 0
            && self.prune_folders.is_empty()
            && self.prune_files.is_empty()
            && self.prune_filekeys.is_empty()
            && self.prune_statekeys.is_empty()
            && self.trash_state.is_none()
            && self.trash_file.is_none()
            && self.deduplicate.is_empty()
    }
}
