//! The database handle
//!
//! [`Quicksave`] owns an open database: the locked [`Storage`], the loaded
//! [`Catalog`], the database flags, and the global configuration. Mutating
//! operations run on a clone of the catalog and swap it in only after the
//! manifest has been written, so a failed operation leaves both the handle
//! and the manifest untouched.

use crate::catalog::Catalog;
use crate::clean;
use crate::config::{Flags, GlobalConfig, DELETE_TRASH, REVERT_STASH};
use crate::error::{QuicksaveError, Result};
use crate::lifecycle::{self, AliasRequest};
use crate::storage::Storage;
use crate::trash;
use crate::types::{
    AliasOutcome, CleanOptions, CleanReport, ConfigEntry, DeleteOptions, DeleteResult, Entry,
    FileDetails, ListEntry, RecoverResult, RegisterOptions, RegisterResult, RevertOptions,
    RevertResult, SaveOptions, SaveResult, ShowResult, StateDetails, StatusResult,
};
use crate::utils;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// An open quicksave database
///
/// # Examples
///
/// ```rust,no_run
/// use quicksave::{Quicksave, SaveOptions};
/// use std::path::{Path, PathBuf};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut db = Quicksave::init(PathBuf::from("./.quicksave"))?;
/// let registered = db.register(Path::new("notes.txt"), Default::default())?;
/// println!("Tracking notes.txt as {}", registered.file_key);
///
/// // Edit notes.txt, then
/// let saved = db.save(Path::new("notes.txt"), SaveOptions::default())?;
/// println!("Saved {}", saved.state_key);
/// db.revert(Path::new("notes.txt"), &registered.state_key, Default::default())?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Quicksave {
    storage: Storage,
    catalog: Catalog,
    flags: BTreeMap<String, String>,
    global: GlobalConfig,
}

impl Quicksave {
    /// Create a database at `path`, or open the one already there
    pub fn init(path: PathBuf) -> Result<Self> {
        QuicksaveBuilder::new().init(path)
    }

    /// Open an existing database
    pub fn open(path: PathBuf) -> Result<Self> {
        QuicksaveBuilder::new().open(path)
    }

    fn from_parts(storage: Storage, catalog: Catalog, flags: BTreeMap<String, String>, global: GlobalConfig) -> Self {
        Self { storage, catalog, flags, global }
    }

    /// Run `op` on a working copy of the catalog and persist the result
    fn transact<T>(&mut self, op: impl FnOnce(&Storage, &mut Catalog, Flags<'_>) -> Result<T>) -> Result<T> {
        let mut working = self.catalog.clone();
        let value = op(&self.storage, &mut working, Flags::new(&self.flags, &self.global.flags))?;
        self.storage.persist(&working, &self.flags)?;
        self.catalog = working;
        Ok(value)
    }

    fn flags(&self) -> Flags<'_> {
        Flags::new(&self.flags, &self.global.flags)
    }

    /// Start tracking a file
    ///
    /// Mints a file-key and a folder, aliases the file-key by absolute path
    /// and basename, and stores the current content as the first state.
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::MissingFile`] if `path` is not a file
    /// - [`QuicksaveError::DuplicateFilepath`] if the path is already tracked
    /// - [`QuicksaveError::ReservedKey`] if an alias uses a reserved name
    /// - [`QuicksaveError::NoAliasAvailable`] if every requested alias of a
    ///   non-empty list is taken
    #[instrument(skip(self, options))]
    pub fn register(&mut self, path: &Path, options: RegisterOptions) -> Result<RegisterResult> {
        self.transact(|storage, catalog, flags| lifecycle::register(storage, catalog, flags, path, &options))
    }

    /// Store the current content of a tracked file as a new state
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::CannotInferKey`] if no file-key was given and none
    ///   matches the path
    /// - [`QuicksaveError::DuplicateState`] if the content is already stored
    ///   and `allow_duplicate` is not set
    #[instrument(skip(self, options))]
    pub fn save(&mut self, path: &Path, options: SaveOptions) -> Result<SaveResult> {
        self.transact(|storage, catalog, flags| lifecycle::save(storage, catalog, flags, path, &options))
    }

    /// Overwrite a tracked file with one of its states
    ///
    /// The current content is kept under `~stash` unless `options.stash` is
    /// off or the `revert.stash` flag disables it.
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::UnknownKey`] if the state does not resolve
    /// - [`QuicksaveError::AlreadyInState`] if the file already matches the
    ///   state and `force` is not set
    #[instrument(skip(self, options))]
    pub fn revert(&mut self, path: &Path, state: &str, mut options: RevertOptions) -> Result<RevertResult> {
        options.stash &= self.flags().enabled(REVERT_STASH, true);
        self.transact(|storage, catalog, flags| lifecycle::revert(storage, catalog, flags, path, state, &options))
    }

    /// Create or delete an alias
    #[instrument(skip(self))]
    pub fn alias(&mut self, request: AliasRequest) -> Result<AliasOutcome> {
        self.transact(|_, catalog, _| lifecycle::alias(catalog, &request))
    }

    /// Delete a file-key, or a state-key when `file_key` is given
    ///
    /// With `save_to_trash` (and the `delete.trash` flag on) the key moves
    /// into the matching `~trash` slot; otherwise its data is removed.
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::CannotDeleteAlias`] if `target` is an alias
    /// - [`QuicksaveError::ReservedKey`] if `target` is `~trash`
    #[instrument(skip(self, options))]
    pub fn delete_key(
        &mut self,
        file_key: Option<&str>,
        target: &str,
        mut options: DeleteOptions,
    ) -> Result<DeleteResult> {
        options.save_to_trash &= self.flags().enabled(DELETE_TRASH, true);
        self.transact(|storage, catalog, _| match file_key {
            Some(file_key) => trash::delete_state_key(storage, catalog, file_key, target, &options),
            None => trash::delete_file_key(storage, catalog, target, &options),
        })
    }

    /// Restore the `~trash` file-key under a fresh name
    #[instrument(skip(self))]
    pub fn recover(&mut self, aliases: &[String]) -> Result<RecoverResult> {
        self.transact(|_, catalog, _| trash::recover(catalog, aliases))
    }

    /// Run integrity passes
    #[instrument(skip(self))]
    pub fn clean(&mut self, options: CleanOptions) -> Result<CleanReport> {
        self.transact(|storage, catalog, _| clean::clean(storage, catalog, &options))
    }

    /// Resolve a file-key, or a state-key of `file_key`, to its authoritative name
    pub fn lookup(&self, file_key: Option<&str>, target: &str) -> Result<String> {
        match file_key {
            Some(file_key) => {
                let owner = self.catalog.resolve_file(file_key)?;
                Ok(self.catalog.resolve_state(&owner, target)?.name)
            }
            None => self.catalog.resolve_file(target),
        }
    }

    /// List file-keys, or the states of `file_key`
    ///
    /// Aliases are included when `with_aliases` is set or a `target` is
    /// given; a `target` narrows the listing to that key and its aliases.
    pub fn list(&self, file_key: Option<&str>, target: Option<&str>, with_aliases: bool) -> Result<Vec<ListEntry>> {
        let with_aliases = with_aliases || target.is_some();
        match file_key {
            None => {
                let only = target.map(|t| self.catalog.resolve_file(t)).transpose()?;
                let rows = self.catalog.files.iter().filter_map(|(name, entry)| {
                    let row = match entry {
                        Entry::Authoritative(_) => ListEntry { name: name.clone(), alias_of: None },
                        Entry::Alias(_) if !with_aliases => return None,
                        Entry::Alias(link) => ListEntry { name: name.clone(), alias_of: Some(link.clone()) },
                    };
                    let keep = only
                        .as_ref()
                        .map_or(true, |key| self.catalog.resolve_file(name).is_ok_and(|r| &r == key));
                    keep.then_some(row)
                });
                Ok(rows.collect())
            }
            Some(file_key) => {
                let owner = self.catalog.resolve_file(file_key)?;
                let only = target.map(|t| self.catalog.resolve_state(&owner, t)).transpose()?;
                let rows = self
                    .catalog
                    .states
                    .iter()
                    .filter(|(id, _)| id.owner == owner)
                    .filter_map(|(id, entry)| {
                        let row = match entry {
                            Entry::Authoritative(_) => ListEntry { name: id.name.clone(), alias_of: None },
                            Entry::Alias(_) if !with_aliases => return None,
                            Entry::Alias(link) => ListEntry { name: id.name.clone(), alias_of: Some(link.name.clone()) },
                        };
                        let keep = only
                            .as_ref()
                            .map_or(true, |state| self.catalog.states.resolve(id).is_ok_and(|r| &r == state));
                        keep.then_some(row)
                    });
                Ok(rows.collect())
            }
        }
    }

    /// Which state, if any, the current content of `path` matches
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::MissingFile`] if `path` is not a file
    pub fn status(&self, path: &Path, file_key: Option<&str>) -> Result<StatusResult> {
        let path = utils::absolute_path(path)?;
        let (file_key, inferred) = lifecycle::infer_file_key(&self.catalog, self.flags(), &path, file_key)?;
        if !path.is_file() {
            return Err(QuicksaveError::MissingFile { path });
        }
        let hash = utils::hash_file_content(&path)?;
        let state = self.catalog.find_state_by_hash(&file_key, &hash)?.map(|id| id.name);
        debug!("Status of {:?}: {:?}", path, state);
        Ok(StatusResult { file_key, inferred, state })
    }

    /// Details of a file-key
    pub fn show_file(&self, file_key: &str) -> Result<FileDetails> {
        let file_key = self.catalog.resolve_file(file_key)?;
        let lineage = self.catalog.lineage(&file_key)?;
        Ok(FileDetails {
            folder: self.storage.folder_path(&lineage.folder),
            aliases: self.catalog.file_aliases_of(&file_key),
            states: self
                .catalog
                .authoritative_states_of(&file_key)
                .into_iter()
                .map(|id| id.name)
                .collect(),
            datafiles: lineage.datafiles.len(),
            file_key,
        })
    }

    /// Details of a state-key
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::MissingFile`] if the data file is gone
    pub fn show_state(&self, file_key: &str, state: &str) -> Result<StateDetails> {
        let file_key = self.catalog.resolve_file(file_key)?;
        let id = self.catalog.resolve_state(&file_key, state)?;
        let snapshot = self.catalog.snapshot(&id)?;
        let datafile = self
            .storage
            .datafile_path(&self.catalog.lineage(&file_key)?.folder, &snapshot.datafile);
        let size = fs::metadata(&datafile)
            .map_err(|e| utils::missing_or_io(e, &datafile))?
            .len();
        Ok(StateDetails {
            aliases: self.catalog.state_aliases_of(&id),
            created_at: snapshot.created_at,
            file_key,
            state: id.name,
            datafile,
            size,
        })
    }

    /// [`Quicksave::show_state`] when `state` is given, else [`Quicksave::show_file`]
    pub fn show(&self, file_key: &str, state: Option<&str>) -> Result<ShowResult> {
        match state {
            Some(state) => self.show_state(file_key, state).map(ShowResult::State),
            None => self.show_file(file_key).map(ShowResult::File),
        }
    }

    /// Effective value of a flag: database, then global, then `default`
    pub fn check_flag(&self, name: &str, default: &str) -> String {
        self.flags().check(name, default)
    }

    /// Value of `key` in one configuration tier
    pub fn config_get(&self, key: &str, global: bool) -> Option<String> {
        let tier = if global { &self.global.flags } else { &self.flags };
        tier.get(key).cloned()
    }

    /// Set `key` in one configuration tier
    #[instrument(skip(self))]
    pub fn config_set(&mut self, key: &str, value: &str, global: bool) -> Result<()> {
        if global {
            self.global.flags.insert(key.to_string(), value.to_string());
            self.global.save()?;
        } else {
            let mut flags = self.flags.clone();
            flags.insert(key.to_string(), value.to_string());
            self.storage.persist(&self.catalog, &flags)?;
            self.flags = flags;
        }
        info!("Set {} = {} ({})", key, value, scope(global));
        Ok(())
    }

    /// Remove `key` from one configuration tier
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::ConfigKeyNotSet`] if `key` is not set there
    #[instrument(skip(self))]
    pub fn config_clear(&mut self, key: &str, global: bool) -> Result<()> {
        let not_set = || QuicksaveError::ConfigKeyNotSet { key: key.to_string(), scope: scope(global) };
        if global {
            self.global.flags.remove(key).ok_or_else(not_set)?;
            self.global.save()?;
        } else {
            let mut flags = self.flags.clone();
            flags.remove(key).ok_or_else(not_set)?;
            self.storage.persist(&self.catalog, &flags)?;
            self.flags = flags;
        }
        info!("Cleared {} ({})", key, scope(global));
        Ok(())
    }

    /// Every configuration key set in either tier
    pub fn config_list(&self) -> Vec<ConfigEntry> {
        let keys: BTreeSet<&String> = self.flags.keys().chain(self.global.flags.keys()).collect();
        keys.into_iter()
            .map(|key| ConfigEntry {
                key: key.clone(),
                global: self.global.flags.get(key).cloned(),
                database: self.flags.get(key).cloned(),
            })
            .collect()
    }

    /// The loaded catalog
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Database root directory
    pub fn root(&self) -> &Path {
        self.storage.root()
    }

    /// The global configuration this handle was opened with
    pub fn global_config(&self) -> &GlobalConfig {
        &self.global
    }
}

fn scope(global: bool) -> &'static str {
    if global {
        "global"
    } else {
        "database"
    }
}

/// Builder for opening a [`Quicksave`] handle
///
/// # Examples
///
/// ```rust,no_run
/// use quicksave::{GlobalConfig, QuicksaveBuilder};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = QuicksaveBuilder::new()
///     .global_config(GlobalConfig::load_default()?)
///     .open_configured()?;
/// println!("Opened {:?}", db.root());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct QuicksaveBuilder {
    global: Option<GlobalConfig>,
}

impl QuicksaveBuilder {
    /// Create a builder with an in-memory global configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` for global flags and the default database
    pub fn global_config(mut self, config: GlobalConfig) -> Self {
        self.global = Some(config);
        self
    }

    /// Create or open the database at `path`
    pub fn init(self, path: PathBuf) -> Result<Quicksave> {
        let (storage, manifest) = Storage::init_or_open(path)?;
        Ok(Quicksave::from_parts(storage, manifest.catalog, manifest.flags, self.global.unwrap_or_default()))
    }

    /// Open the existing database at `path`
    pub fn open(self, path: PathBuf) -> Result<Quicksave> {
        let (storage, manifest) = Storage::open(path)?;
        Ok(Quicksave::from_parts(storage, manifest.catalog, manifest.flags, self.global.unwrap_or_default()))
    }

    /// Open the database recorded in the global configuration
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::NoDatabase`] if none is recorded
    pub fn open_configured(self) -> Result<Quicksave> {
        let path = self
            .global
            .as_ref()
            .and_then(|config| config.database.clone())
            .ok_or(QuicksaveError::NoDatabase)?;
        self.open(path)
    }
}
