//! Register, save, revert, and alias operations
//!
//! Each function here runs against a working copy of the catalog handed in
//! by [`crate::Quicksave`]. Nothing is persisted from this module; the handle
//! writes the manifest once the function returns `Ok`.

use crate::catalog::{self, Catalog, STASH};
use crate::config::{Flags, INFERENCE_NAME, INFERENCE_NORECORD, INFERENCE_PATH};
use crate::error::{QuicksaveError, Result};
use crate::storage::Storage;
use crate::types::{
    AliasOutcome, Entry, KeyKind, RegisterOptions, RegisterResult, RevertOptions, RevertResult,
    SaveOptions, SaveResult, Snapshot, StateId,
};
use crate::utils;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Name used when a basename has no usable characters
const FALLBACK_NAME: &str = "file";

/// One of the four alias operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasRequest {
    /// `alias <link> <target>`
    CreateFileAlias {
        /// New alias name
        link: String,
        /// File-key or alias to point at
        target: String,
    },
    /// `alias -d <link>`
    DeleteFileAlias {
        /// Alias to remove
        link: String,
    },
    /// `alias <link> <target> <filekey>`
    CreateStateAlias {
        /// New alias name
        link: String,
        /// State-key or alias to point at
        target: String,
        /// Owning file-key or alias
        file_key: String,
    },
    /// `alias -d <link> <filekey>`
    DeleteStateAlias {
        /// Alias to remove
        link: String,
        /// Owning file-key or alias
        file_key: String,
    },
}

impl AliasRequest {
    /// Map positional alias arguments to a request
    ///
    /// With `delete`, the optional second argument is the owning file-key.
    /// Without it, the second argument is the target and the optional third
    /// is the owning file-key.
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::InvalidArguments`] for any other combination
    pub fn from_args(
        link: impl Into<String>,
        second: Option<String>,
        third: Option<String>,
        delete: bool,
    ) -> Result<Self> {
        let link = link.into();
        match (delete, second, third) {
            (true, None, None) => Ok(Self::DeleteFileAlias { link }),
            (true, Some(file_key), None) => Ok(Self::DeleteStateAlias { link, file_key }),
            (false, Some(target), None) => Ok(Self::CreateFileAlias { link, target }),
            (false, Some(target), Some(file_key)) => Ok(Self::CreateStateAlias { link, target, file_key }),
            (true, Some(_), Some(_)) => Err(QuicksaveError::invalid_arguments(
                "alias deletion takes a link and an optional file key",
            )),
            (false, None, _) => Err(QuicksaveError::invalid_arguments(
                "alias creation requires a target",
            )),
            (true, None, Some(_)) => Err(QuicksaveError::invalid_arguments(
                "a file key cannot be given without a link",
            )),
        }
    }
}

fn or_fallback(name: String) -> String {
    if name.trim_matches('.').is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Work out which file-key an operation on `path` refers to
///
/// An explicit key is resolved as given. Otherwise the absolute path is
/// tried when `inference.path` is on, then the basename when
/// `inference.name` is on. Returns the authoritative key and whether it was
/// inferred.
///
/// A path alias that no longer resolves fails with
/// [`QuicksaveError::UnknownKey`] rather than falling back to the basename;
/// `clean -a` removes such aliases.
pub(crate) fn infer_file_key(
    catalog: &Catalog,
    flags: Flags<'_>,
    path: &Path,
    explicit: Option<&str>,
) -> Result<(String, bool)> {
    if let Some(key) = explicit {
        return Ok((catalog.resolve_file(key)?, false));
    }

    if flags.enabled(INFERENCE_PATH, true) {
        let by_path = path_key(path);
        if catalog.files.contains(&by_path) {
            trace!("Inferred file key from path {}", by_path);
            return Ok((catalog.resolve_file(&by_path)?, true));
        }
    }
    if flags.enabled(INFERENCE_NAME, true) {
        if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
            if catalog.files.contains(&name) {
                trace!("Inferred file key from basename {}", name);
                return Ok((catalog.resolve_file(&name)?, true));
            }
        }
    }

    Err(QuicksaveError::CannotInferKey { path: path.to_path_buf() })
}

/// Copy `src` into the lineage of `file_key` as authoritative state `name`
pub(crate) fn store_snapshot(
    storage: &Storage,
    catalog: &mut Catalog,
    file_key: &str,
    src: &Path,
    name: String,
) -> Result<StateId> {
    let basename = utils::file_name(src)?;
    let lineage = catalog.lineage(file_key)?;
    let folder = lineage.folder.clone();

    let mut taken = lineage.datafiles.clone();
    taken.extend(storage.folder_entries(&folder)?);
    let datafile = utils::reserve_name(&or_fallback(utils::canonical_name(&basename, true)), &taken);

    storage.store_file(src, &folder, &datafile)?;
    let id = StateId::new(file_key, name);
    catalog.add_state(id.clone(), Snapshot::new(datafile))?;
    debug!("Stored snapshot {}", id);
    Ok(id)
}

/// Mint a state name for `src` and store it
fn take_snapshot(storage: &Storage, catalog: &mut Catalog, file_key: &str, src: &Path) -> Result<StateId> {
    let basename = utils::file_name(src)?;
    let name = catalog.mint_state_name(file_key, &or_fallback(utils::canonical_name(&basename, false)));
    store_snapshot(storage, catalog, file_key, src, name)
}

fn require_file(path: &Path) -> Result<PathBuf> {
    let path = utils::absolute_path(path)?;
    if !path.is_file() {
        return Err(QuicksaveError::MissingFile { path });
    }
    Ok(path)
}

/// Start tracking a file under a fresh file-key
pub(crate) fn register(
    storage: &Storage,
    catalog: &mut Catalog,
    flags: Flags<'_>,
    filepath: &Path,
    options: &RegisterOptions,
) -> Result<RegisterResult> {
    let path = require_file(filepath)?;
    let by_path = path_key(&path);

    if !options.allow_duplicate_path && catalog.files.contains(&by_path) {
        let file_key = catalog.resolve_file(&by_path).unwrap_or_else(|_| by_path.clone());
        return Err(QuicksaveError::DuplicateFilepath { path, file_key });
    }
    options.file_aliases.iter().try_for_each(|a| catalog::guard_file_name(a))?;
    options.state_aliases.iter().try_for_each(|a| catalog::guard_state_name(a))?;

    let basename = utils::file_name(&path)?;
    let canonical = or_fallback(utils::canonical_name(&basename, false));

    let mut taken = catalog.folder_names();
    taken.extend(storage.top_level_names()?);
    let folder = utils::reserve_name(&canonical, &taken);
    storage.create_folder(&folder)?;

    let file_key = catalog.create_file_key(&canonical, &folder)?;
    catalog.touch(&file_key)?;

    let mut file_aliases = catalog.apply_file_aliases(&options.file_aliases, &file_key)?;
    let norecord = flags.enabled(INFERENCE_NORECORD, false);
    let auto = [
        (flags.enabled(INFERENCE_PATH, true) || !norecord, by_path),
        (flags.enabled(INFERENCE_NAME, true) || !norecord, basename),
    ];
    for (record, name) in auto {
        if record && !catalog::is_reserved_file(&name) && catalog.add_file_alias(&name, &file_key, false)? {
            file_aliases.push(name);
        }
    }

    let hash = utils::hash_file_content(&path)?;
    let state = take_snapshot(storage, catalog, &file_key, &path)?;
    catalog.add_state_alias(&file_key, &hash, &state.name, false)?;

    let mut state_aliases = Vec::new();
    let short = utils::short_hash(&hash);
    // Minted `_SK<n>` names never look like a hex prefix, so this only
    // fires when the entry was added by hand
    if !catalog.states.contains(&StateId::new(&file_key, short)) {
        catalog.add_state_alias(&file_key, short, &state.name, false)?;
        state_aliases.push(short.to_string());
    }
    state_aliases.extend(catalog.apply_state_aliases(&file_key, &options.state_aliases, &state.name, false)?);

    info!("Registered {:?} as {} (state {})", path, file_key, state.name);
    Ok(RegisterResult { file_key, file_aliases, state_key: state.name, state_aliases, hash })
}

/// Snapshot the current content of a tracked file
pub(crate) fn save(
    storage: &Storage,
    catalog: &mut Catalog,
    flags: Flags<'_>,
    filepath: &Path,
    options: &SaveOptions,
) -> Result<SaveResult> {
    let path = require_file(filepath)?;
    let (file_key, inferred) = infer_file_key(catalog, flags, &path, options.file_key.as_deref())?;
    options.aliases.iter().try_for_each(|a| catalog::guard_state_name(a))?;

    let hash = utils::hash_file_content(&path)?;
    let duplicate = catalog.find_state_by_hash(&file_key, &hash)?;
    if let Some(existing) = &duplicate {
        if !options.allow_duplicate {
            return Err(QuicksaveError::DuplicateState { state: existing.name.clone() });
        }
        debug!("Saving duplicate of {}", existing);
    }

    let state = take_snapshot(storage, catalog, &file_key, &path)?;
    let mut aliases = catalog.apply_state_aliases(&file_key, &options.aliases, &state.name, options.force)?;

    if duplicate.is_none() {
        let short = utils::short_hash(&hash);
        let short_id = StateId::new(&file_key, short);
        let overwrite = match catalog.states.get(&short_id) {
            None => Some(false),
            Some(Entry::Alias(_)) if options.force => Some(true),
            Some(_) => None,
        };
        if let Some(overwrite) = overwrite {
            if catalog.add_state_alias(&file_key, short, &state.name, overwrite)? {
                aliases.push(short.to_string());
            }
        }
    }

    let basename = utils::file_name(&path)?;
    let elsewhere = catalog.files.contains(&basename)
        && catalog.resolve_file(&basename).map_or(true, |key| key != file_key);
    if !elsewhere
        && !catalog::is_reserved_state(&basename)
        && !catalog.states.contains(&StateId::new(&file_key, &basename))
        && catalog.add_state_alias(&file_key, &basename, &state.name, false)?
    {
        aliases.push(basename);
    }

    catalog.add_state_alias(&file_key, &hash, &state.name, false)?;
    catalog.touch(&file_key)?;

    info!("Saved {:?} as {}", path, state);
    Ok(SaveResult { file_key, inferred, state_key: state.name, aliases, hash })
}

/// Replace the per-lineage `~stash` with the current content of `path`
///
/// `current` is the state already holding that content, if any.
fn stash_current(
    storage: &Storage,
    catalog: &mut Catalog,
    file_key: &str,
    path: &Path,
    hash: &str,
    current: Option<StateId>,
) -> Result<()> {
    let stash = StateId::new(file_key, STASH);
    if current.as_ref() == Some(&stash) {
        debug!("Current content already stashed");
        return Ok(());
    }

    match catalog.states.get(&stash) {
        Some(Entry::Authoritative(_)) => {
            catalog.drop_state_aliases_of(&stash);
            if let Some(old) = catalog.remove_state(&stash) {
                let folder = catalog.lineage(file_key)?.folder.clone();
                storage.remove_file(&folder, &old.datafile)?;
            }
        }
        Some(Entry::Alias(_)) => {
            catalog.states.remove(&stash);
        }
        None => {}
    }

    match current {
        Some(existing) => {
            catalog.states.insert(stash, Entry::Alias(existing));
        }
        None => {
            store_snapshot(storage, catalog, file_key, path, STASH.to_string())?;
            catalog.add_state_alias(file_key, hash, STASH, false)?;
        }
    }
    Ok(())
}

/// Overwrite a tracked file with a stored state
pub(crate) fn revert(
    storage: &Storage,
    catalog: &mut Catalog,
    flags: Flags<'_>,
    filepath: &Path,
    state_name: &str,
    options: &RevertOptions,
) -> Result<RevertResult> {
    let path = utils::absolute_path(filepath)?;
    let (file_key, inferred) = infer_file_key(catalog, flags, &path, options.file_key.as_deref())?;
    let target = catalog.resolve_state(&file_key, state_name)?;

    let mut stashed = false;
    if path.is_file() {
        let hash = utils::hash_file_content(&path)?;
        let current = catalog.find_state_by_hash(&file_key, &hash)?;
        if current.as_ref() == Some(&target) && !options.force {
            return Err(QuicksaveError::AlreadyInState { state: target.name });
        }
        if options.stash && state_name != STASH && target.name != STASH {
            stash_current(storage, catalog, &file_key, &path, &hash, current)?;
            stashed = true;
        }
    } else {
        debug!("{:?} does not exist, nothing to stash", path);
    }

    let datafile = catalog.snapshot(&target)?.datafile.clone();
    let folder = catalog.lineage(&file_key)?.folder.clone();
    storage.restore_file(&folder, &datafile, &path)?;
    catalog.touch(&file_key)?;

    info!("Reverted {:?} to {}", path, target);
    Ok(RevertResult { file_key, inferred, state: target.name, stashed })
}

/// Create or delete a file or state alias
pub(crate) fn alias(catalog: &mut Catalog, request: &AliasRequest) -> Result<AliasOutcome> {
    match request {
        AliasRequest::CreateFileAlias { link, target } => {
            let resolved = catalog.resolve_file(target)?;
            if catalog.files.is_authoritative(link) {
                return Err(QuicksaveError::DuplicateKey { kind: KeyKind::File, name: link.clone() });
            }
            catalog::guard_file_name(link)?;
            catalog.add_file_alias(link, &resolved, true)?;
            catalog.touch(&resolved)?;
            info!("Aliased {} -> {}", link, resolved);
            Ok(AliasOutcome::Created { link: link.clone(), target: resolved, file_key: None })
        }
        AliasRequest::DeleteFileAlias { link } => {
            catalog::guard_file_name(link)?;
            let target = match catalog.files.get(link) {
                None => return Err(QuicksaveError::unknown_file(link.as_str())),
                Some(Entry::Authoritative(_)) => {
                    return Err(QuicksaveError::CannotDeleteAuthoritative {
                        kind: KeyKind::File,
                        name: link.clone(),
                    })
                }
                Some(Entry::Alias(target)) => target.clone(),
            };
            catalog.files.remove(link);
            if let Ok(resolved) = catalog.resolve_file(&target) {
                catalog.touch(&resolved)?;
            }
            info!("Removed file alias {}", link);
            Ok(AliasOutcome::Deleted { link: link.clone(), file_key: None })
        }
        AliasRequest::CreateStateAlias { link, target, file_key } => {
            let file_key = catalog.resolve_file(file_key)?;
            let resolved = catalog.resolve_state(&file_key, target)?;
            if catalog.states.is_authoritative(&StateId::new(&file_key, link)) {
                return Err(QuicksaveError::DuplicateKey { kind: KeyKind::State, name: link.clone() });
            }
            catalog::guard_state_name(link)?;
            catalog.add_state_alias(&file_key, link, &resolved.name, true)?;
            catalog.touch(&file_key)?;
            info!("Aliased {}:{} -> {}", file_key, link, resolved.name);
            Ok(AliasOutcome::Created { link: link.clone(), target: resolved.name, file_key: Some(file_key) })
        }
        AliasRequest::DeleteStateAlias { link, file_key } => {
            let file_key = catalog.resolve_file(file_key)?;
            catalog::guard_state_name(link)?;
            let id = StateId::new(&file_key, link);
            match catalog.states.get(&id) {
                None => return Err(QuicksaveError::unknown_state(id.to_string())),
                Some(Entry::Authoritative(_)) => {
                    return Err(QuicksaveError::CannotDeleteAuthoritative {
                        kind: KeyKind::State,
                        name: link.clone(),
                    })
                }
                Some(Entry::Alias(_)) => {}
            }
            catalog.states.remove(&id);
            catalog.touch(&file_key)?;
            info!("Removed state alias {}", id);
            Ok(AliasOutcome::Deleted { link: link.clone(), file_key: Some(file_key) })
        }
    }
}
