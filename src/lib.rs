//! # Quicksave - local file versioning by name
//!
//! Quicksave keeps snapshots of individual files in a local database and lets
//! you name, restore, and prune them through a two-tier key system.
//!
//! ## Overview
//!
//! - A **file-key** names the lineage of one tracked file. Registering a file
//!   mints a key such as `notes_FK1` and aliases it by the file's absolute
//!   path and basename, so most commands can infer it.
//! - A **state-key** names one snapshot within a lineage, such as
//!   `notes_FK1:notes_SK2`. Every state is also aliased by its full SHA-256
//!   digest and, when free, by the 7-character digest prefix.
//! - Any key may be an alias, and alias chains always resolve to an
//!   authoritative key.
//!
//! Three reserved names live in the same graph and are maintained by the
//! operations themselves:
//!
//! - `~last`: file alias of the most recently touched lineage
//! - `~trash`: rotating slot for the most recently deleted file-key, and a
//!   per-lineage slot for the most recently deleted state-key
//! - `~stash`: per-lineage slot holding the content a revert overwrote
//!
//! ## Architecture
//!
//! - [`name_table::NameTable`]: generic name → entry map with alias resolution
//! - [`catalog::Catalog`]: both tables plus reserved-name and batch rules
//! - [`Storage`]: database directory, manifest encoding, and advisory lock
//! - [`Quicksave`]: the handle that runs each operation as a transaction over
//!   a working copy of the catalog, persisting once at the end
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quicksave::{CleanOptions, DeleteOptions, Quicksave, RevertOptions, SaveOptions};
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut db = Quicksave::init(PathBuf::from("./.quicksave"))?;
//! let notes = Path::new("notes.txt");
//!
//! let first = db.register(notes, Default::default())?;
//!
//! // ... edit notes.txt ...
//! db.save(notes, SaveOptions { aliases: vec!["draft".into()], ..Default::default() })?;
//!
//! // Restore the first snapshot; the current content goes to ~stash
//! db.revert(notes, &first.state_key, RevertOptions::default())?;
//!
//! // Move the whole lineage to ~trash, then bring it back
//! db.delete_key(None, &first.file_key, DeleteOptions::default())?;
//! let recovered = db.recover(&[])?;
//! println!("Recovered as {}", recovered.file_key);
//!
//! let report = db.clean(CleanOptions::all())?;
//! println!("Clean took {}ms", report.duration_ms);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Behavior toggles are looked up in the database manifest first, then in
//! the per-user [`GlobalConfig`]:
//!
//! | Flag | Default | Effect |
//! |---|---|---|
//! | `inference.path` | on | infer file-keys from absolute paths |
//! | `inference.name` | on | infer file-keys from basenames |
//! | `inference.norecord` | off | skip path/basename aliases the inference flags do not use |
//! | `revert.stash` | on | stash current content before a revert |
//! | `delete.trash` | on | move deleted keys to `~trash` |

// Public API modules
pub mod catalog;
pub mod config;
pub mod error;
pub mod name_table;
pub mod quicksave;
pub mod storage;
pub mod types;
pub mod utils;

// Operation implementations, driven through `Quicksave`
mod clean;
mod lifecycle;
mod trash;

// Re-export main types for convenience
pub use catalog::Catalog;
pub use config::{Flags, GlobalConfig};
pub use error::{QuicksaveError, Result};
pub use lifecycle::AliasRequest;
pub use quicksave::{Quicksave, QuicksaveBuilder};
pub use storage::Storage;
pub use types::*;
