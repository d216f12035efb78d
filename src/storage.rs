//! Database directory and manifest storage
//!
//! A database is a directory holding one manifest file and one folder per
//! authoritative file-key:
//!
//! ```text
//! database_root/
//! ├── .db_config        # Signature line followed by one JSON record per line
//! ├── LOCK              # Advisory lock held while a handle is open
//! ├── notestxt/         # Folder of file-key notes_FK1
//! │   ├── notes.txt     # Data file of state notes_SK1
//! │   └── notes_1.txt   # Data file of state notes_SK2
//! └── reporttxt/
//!     └── report.txt
//! ```
//!
//! ## Manifest format
//!
//! The first line is the literal signature `<QUICKSAVE DB>`. Each following
//! line is a JSON object tagged by `kind`:
//!
//! ```text
//! <QUICKSAVE DB>
//! {"kind":"file_key","name":"notes_FK1","folder":"notestxt","datafiles":["notes.txt"]}
//! {"kind":"file_alias","name":"notes.txt","target":"notes_FK1"}
//! {"kind":"state_key","owner":"notes_FK1","name":"notes_SK1","datafile":"notes.txt","created_at":"..."}
//! {"kind":"state_alias","owner":"notes_FK1","name":"8f2c1ab","target":"notes_SK1"}
//! {"kind":"config","key":"revert.stash","value":"0"}
//! ```
//!
//! The manifest is rewritten in full through a temp file and rename, so a
//! failed write leaves the previous manifest intact.

use crate::catalog::Catalog;
use crate::error::{QuicksaveError, Result};
use crate::types::{Entry, Lineage, Snapshot, StateId};
use crate::utils;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Manifest file name inside the database root
pub const MANIFEST_FILE: &str = ".db_config";
/// Lock file name inside the database root
pub const LOCK_FILE: &str = "LOCK";
/// First line of every manifest
pub const SIGNATURE: &str = "<QUICKSAVE DB>";

/// One manifest line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record {
    FileKey {
        name: String,
        folder: String,
        datafiles: BTreeSet<String>,
    },
    FileAlias {
        name: String,
        target: String,
    },
    StateKey {
        owner: String,
        name: String,
        datafile: String,
        created_at: DateTime<Utc>,
    },
    StateAlias {
        owner: String,
        name: String,
        target: String,
    },
    Config {
        key: String,
        value: String,
    },
}

/// Decoded manifest contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Both name tables
    pub catalog: Catalog,
    /// Database-level configuration flags
    pub flags: BTreeMap<String, String>,
}

/// Encode a catalog and its flags as manifest text
pub fn encode_manifest(catalog: &Catalog, flags: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(64 * (catalog.files.len() + catalog.states.len() + 1));
    out.push_str(SIGNATURE);
    out.push('\n');

    let file_records = catalog.files.iter().map(|(name, entry)| match entry {
        Entry::Authoritative(lineage) => Record::FileKey {
            name: name.clone(),
            folder: lineage.folder.clone(),
            datafiles: lineage.datafiles.clone(),
        },
        Entry::Alias(target) => Record::FileAlias { name: name.clone(), target: target.clone() },
    });
    let state_records = catalog.states.iter().map(|(id, entry)| match entry {
        Entry::Authoritative(snapshot) => Record::StateKey {
            owner: id.owner.clone(),
            name: id.name.clone(),
            datafile: snapshot.datafile.clone(),
            created_at: snapshot.created_at,
        },
        Entry::Alias(target) => Record::StateAlias {
            owner: id.owner.clone(),
            name: id.name.clone(),
            target: target.name.clone(),
        },
    });
    let config_records = flags
        .iter()
        .map(|(key, value)| Record::Config { key: key.clone(), value: value.clone() });

    for record in file_records.chain(state_records).chain(config_records) {
        out.push_str(&serde_json::to_string(&record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Decode manifest text
///
/// # Errors
///
/// - [`QuicksaveError::CorruptDatabase`] on a signature mismatch, an
///   unparsable line, or a name recorded twice
pub fn decode_manifest(text: &str) -> Result<Manifest> {
    let mut lines = text.lines();
    if lines.next().map(str::trim) != Some(SIGNATURE) {
        return Err(QuicksaveError::corrupt("unable to verify database signature"));
    }

    let mut manifest = Manifest::default();
    for (index, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(line).map_err(|e| {
            QuicksaveError::corrupt(format!("manifest line {}: {}", index + 2, e))
        })?;

        let duplicate = match record {
            Record::FileKey { name, folder, datafiles } => manifest
                .catalog
                .files
                .insert(name.clone(), Entry::Authoritative(Lineage { folder, datafiles }))
                .map(|_| name),
            Record::FileAlias { name, target } => {
                manifest.catalog.files.insert(name.clone(), Entry::Alias(target)).map(|_| name)
            }
            Record::StateKey { owner, name, datafile, created_at } => {
                let id = StateId::new(owner, name);
                manifest
                    .catalog
                    .states
                    .insert(id.clone(), Entry::Authoritative(Snapshot { datafile, created_at }))
                    .map(|_| id.to_string())
            }
            Record::StateAlias { owner, name, target } => {
                let target = StateId::new(owner.clone(), target);
                let id = StateId::new(owner, name);
                manifest.catalog.states.insert(id.clone(), Entry::Alias(target)).map(|_| id.to_string())
            }
            Record::Config { key, value } => {
                manifest.flags.insert(key, value);
                None
            }
        };
        if let Some(name) = duplicate {
            return Err(QuicksaveError::corrupt(format!("{} is recorded more than once", name)));
        }
    }
    Ok(manifest)
}

/// Handle on a database directory
///
/// Holds an exclusive advisory lock on `LOCK` for its whole lifetime; a
/// second handle on the same directory fails with
/// [`QuicksaveError::DatabaseLocked`].
pub struct Storage {
    /// Database root directory
    root: PathBuf,
    /// Lock file, held open to keep the lock
    _lock: File,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("root", &self.root).finish()
    }
}

impl Storage {
    /// Create a database at `root`, or open the one already there
    ///
    /// Creates the directory if needed and writes an empty manifest when
    /// none exists.
    pub fn init_or_open(root: PathBuf) -> Result<(Self, Manifest)> {
        if root.join(MANIFEST_FILE).is_file() {
            return Self::open(root);
        }
        if root.is_file() {
            return Err(QuicksaveError::InvalidPath(root));
        }

        fs::create_dir_all(&root)?;
        let root = utils::absolute_path(&root)?;
        let lock = Self::lock(&root)?;
        let storage = Self { root, _lock: lock };
        let manifest = Manifest::default();
        storage.persist(&manifest.catalog, &manifest.flags)?;

        info!("Initialized database at {:?}", storage.root);
        Ok((storage, manifest))
    }

    /// Open an existing database and load its manifest
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::NoDatabase`] if `root` does not exist
    /// - [`QuicksaveError::CorruptDatabase`] if the manifest is missing or
    ///   fails to decode
    /// - [`QuicksaveError::DatabaseLocked`] if another handle holds the lock
    pub fn open(root: PathBuf) -> Result<(Self, Manifest)> {
        if !root.is_dir() {
            return Err(QuicksaveError::NoDatabase);
        }
        let root = utils::absolute_path(&root)?;
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(QuicksaveError::corrupt(format!("no manifest found in {:?}", root)));
        }

        let lock = Self::lock(&root)?;
        let text = fs::read_to_string(&manifest_path)?;
        let manifest = decode_manifest(&text)?;

        info!(
            "Opened database at {:?} ({} file entries, {} state entries)",
            root,
            manifest.catalog.files.len(),
            manifest.catalog.states.len()
        );
        Ok((Self { root, _lock: lock }, manifest))
    }

    fn lock(root: &Path) -> Result<File> {
        let lock_path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        file.try_lock_exclusive()
            .map_err(|_| QuicksaveError::DatabaseLocked(root.to_path_buf()))?;
        Ok(file)
    }

    /// Rewrite the manifest
    pub fn persist(&self, catalog: &Catalog, flags: &BTreeMap<String, String>) -> Result<()> {
        let text = encode_manifest(catalog, flags)?;
        utils::atomic_write(&self.root.join(MANIFEST_FILE), text.as_bytes())?;
        debug!("Persisted manifest ({} bytes)", text.len());
        Ok(())
    }

    /// Database root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a lineage folder
    pub fn folder_path(&self, folder: &str) -> PathBuf {
        self.root.join(folder)
    }

    /// Absolute path of a data file
    pub fn datafile_path(&self, folder: &str, datafile: &str) -> PathBuf {
        self.root.join(folder).join(datafile)
    }

    /// Create a lineage folder
    pub fn create_folder(&self, folder: &str) -> Result<()> {
        fs::create_dir_all(self.folder_path(folder))?;
        Ok(())
    }

    /// Copy `src` into a lineage folder, returning the bytes copied
    pub fn store_file(&self, src: &Path, folder: &str, datafile: &str) -> Result<u64> {
        let dest = self.datafile_path(folder, datafile);
        let bytes = fs::copy(src, &dest).map_err(|e| utils::missing_or_io(e, src))?;
        debug!("Stored {:?} as {:?} ({} bytes)", src, dest, bytes);
        Ok(bytes)
    }

    /// Copy a data file over `dest`
    pub fn restore_file(&self, folder: &str, datafile: &str, dest: &Path) -> Result<u64> {
        let src = self.datafile_path(folder, datafile);
        let bytes = fs::copy(&src, dest).map_err(|e| utils::missing_or_io(e, &src))?;
        debug!("Restored {:?} from {:?}", dest, src);
        Ok(bytes)
    }

    /// Hash a stored data file
    pub fn hash_datafile(&self, folder: &str, datafile: &str) -> Result<String> {
        utils::hash_file_content(&self.datafile_path(folder, datafile))
    }

    /// Remove a data file; a file that is already gone is not an error
    pub fn remove_file(&self, folder: &str, datafile: &str) -> Result<bool> {
        let path = self.datafile_path(folder, datafile);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Data file {:?} was already missing", path);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a lineage folder and everything in it
    pub fn remove_folder(&self, folder: &str) -> Result<bool> {
        let path = self.folder_path(folder);
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Folder {:?} was already missing", path);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of every entry directly under the database root
    pub fn top_level_names(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(&self.root)? {
            names.insert(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    /// Names of every entry directly inside a lineage folder
    pub fn folder_entries(&self, folder: &str) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let path = self.folder_path(folder);
        if !path.is_dir() {
            return Ok(names);
        }
        for entry in fs::read_dir(path)? {
            names.insert(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}
