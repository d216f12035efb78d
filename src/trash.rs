//! Key deletion and the `~trash` slots
//!
//! Deleting a key either destroys it or moves it into a rotating `~trash`
//! slot. There is one file-level slot (`~trash` in the file table) and one
//! state-level slot per lineage (`<owner>:~trash`). Moving a key into a slot
//! purges whatever the slot held before.

use crate::catalog::{self, Catalog, LAST, TRASH};
use crate::error::{QuicksaveError, Result};
use crate::storage::Storage;
use crate::types::{DeleteOptions, DeleteResult, Entry, KeyKind, RecoverResult, StateId};
use crate::utils;
use tracing::{debug, info, warn};

/// Physically purge the file-level `~trash` slot, if occupied
fn purge_file_slot(storage: &Storage, catalog: &mut Catalog, drop_aliases: bool) -> Result<()> {
    let trash = TRASH.to_string();
    if !catalog.files.is_authoritative(&trash) {
        return Ok(());
    }
    if drop_aliases {
        let dropped = catalog.drop_file_aliases_of(TRASH);
        debug!("Dropped {} aliases of the old trash", dropped.len());
    }
    if let Some(Entry::Authoritative(lineage)) = catalog.files.remove(&trash) {
        storage.remove_folder(&lineage.folder)?;
    }
    catalog.drop_states_of(TRASH);
    Ok(())
}

/// Physically purge the state-level `~trash` slot of `file_key`, if occupied
///
/// Hash aliases of the purged content are always dropped; other aliases
/// stay attached to the slot unless `drop_aliases` is set.
fn purge_state_slot(storage: &Storage, catalog: &mut Catalog, file_key: &str, drop_aliases: bool) -> Result<()> {
    let slot = StateId::new(file_key, TRASH);
    let datafile = match catalog.states.get(&slot) {
        Some(Entry::Authoritative(snapshot)) => snapshot.datafile.clone(),
        Some(Entry::Alias(_)) => {
            catalog.states.remove(&slot);
            return Ok(());
        }
        None => return Ok(()),
    };
    let folder = catalog.lineage(file_key)?.folder.clone();

    if drop_aliases {
        catalog.drop_state_aliases_of(&slot);
    } else {
        match storage.hash_datafile(&folder, &datafile) {
            Ok(hash) => {
                for name in [hash.as_str(), utils::short_hash(&hash)] {
                    let id = StateId::new(file_key, name);
                    if catalog.states.resolve(&id).is_ok_and(|resolved| resolved == slot) {
                        catalog.states.remove(&id);
                    }
                }
            }
            Err(QuicksaveError::MissingFile { path }) => {
                warn!("Trash data file {:?} is missing, keeping its aliases", path);
            }
            Err(e) => return Err(e),
        }
    }

    catalog.remove_state(&slot);
    storage.remove_file(&folder, &datafile)?;
    Ok(())
}

/// Delete an authoritative file-key
pub(crate) fn delete_file_key(
    storage: &Storage,
    catalog: &mut Catalog,
    target: &str,
    options: &DeleteOptions,
) -> Result<DeleteResult> {
    if target == TRASH {
        return Err(QuicksaveError::ReservedKey { kind: KeyKind::File, name: target.to_string() });
    }
    match catalog.files.get(&target.to_string()) {
        None => return Err(QuicksaveError::unknown_file(target)),
        Some(Entry::Alias(_)) => {
            return Err(QuicksaveError::CannotDeleteAlias { kind: KeyKind::File, name: target.to_string() })
        }
        Some(Entry::Authoritative(_)) => {}
    }

    if options.save_to_trash {
        purge_file_slot(storage, catalog, options.clean_trash_aliases)?;

        for alias in catalog.file_aliases_of(target) {
            catalog.files.insert(alias, Entry::Alias(TRASH.to_string()));
        }
        if let Some(entry) = catalog.files.remove(&target.to_string()) {
            catalog.files.insert(TRASH.to_string(), entry);
        }
        catalog.rehome_states(target, TRASH);
        catalog.touch(TRASH)?;
        info!("Moved file key {} to {}", target, TRASH);
    } else {
        let aliases = catalog.drop_file_aliases_of(target);
        if let Some(Entry::Authoritative(lineage)) = catalog.files.remove(&target.to_string()) {
            storage.remove_folder(&lineage.folder)?;
        }
        let states = catalog.drop_states_of(target);
        info!(
            "Deleted file key {} ({} aliases, {} state entries)",
            target,
            aliases.len(),
            states.len()
        );
    }

    Ok(DeleteResult { file_key: target.to_string(), state: None, trashed: options.save_to_trash })
}

/// Delete an authoritative state-key of `file_key`
pub(crate) fn delete_state_key(
    storage: &Storage,
    catalog: &mut Catalog,
    file_key: &str,
    target: &str,
    options: &DeleteOptions,
) -> Result<DeleteResult> {
    let file_key = catalog.resolve_file(file_key)?;
    if target == TRASH {
        return Err(QuicksaveError::ReservedKey { kind: KeyKind::State, name: target.to_string() });
    }
    let id = StateId::new(&file_key, target);
    match catalog.states.get(&id) {
        None => return Err(QuicksaveError::unknown_state(id.to_string())),
        Some(Entry::Alias(_)) => {
            return Err(QuicksaveError::CannotDeleteAlias { kind: KeyKind::State, name: target.to_string() })
        }
        Some(Entry::Authoritative(_)) => {}
    }

    if options.save_to_trash {
        purge_state_slot(storage, catalog, &file_key, options.clean_trash_aliases)?;

        let slot = StateId::new(&file_key, TRASH);
        for alias in catalog.states.aliases_of(&id) {
            catalog.states.insert(alias, Entry::Alias(slot.clone()));
        }
        if let Some(entry) = catalog.states.remove(&id) {
            catalog.states.insert(slot, entry);
        }
        info!("Moved state {} to {}:{}", id, file_key, TRASH);
    } else {
        catalog.drop_state_aliases_of(&id);
        if let Some(snapshot) = catalog.remove_state(&id) {
            let folder = catalog.lineage(&file_key)?.folder.clone();
            storage.remove_file(&folder, &snapshot.datafile)?;
        }
        info!("Deleted state {}", id);
    }

    catalog.touch(&file_key)?;
    Ok(DeleteResult { file_key, state: Some(target.to_string()), trashed: options.save_to_trash })
}

/// Promote the `~trash` file-key back to a fresh authoritative key
pub(crate) fn recover(catalog: &mut Catalog, aliases: &[String]) -> Result<RecoverResult> {
    aliases.iter().try_for_each(|a| catalog::guard_file_name(a))?;
    let lineage = match catalog.files.get(&TRASH.to_string()) {
        Some(Entry::Authoritative(lineage)) => lineage.clone(),
        _ => return Err(QuicksaveError::NothingToRecover),
    };

    let canonical = utils::canonical_name(&lineage.folder, false);
    let file_key = catalog.create_file_key(&canonical, &lineage.folder)?;
    *catalog.lineage_mut(&file_key)? = lineage;

    let mut migrated = Vec::new();
    for alias in catalog.files.direct_aliases_of(&TRASH.to_string()) {
        catalog.files.insert(alias.clone(), Entry::Alias(file_key.clone()));
        if alias != LAST {
            migrated.push(alias);
        }
    }
    catalog.files.remove(&TRASH.to_string());
    catalog.rehome_states(TRASH, &file_key);

    let applied = catalog.apply_file_aliases(aliases, &file_key)?;
    catalog.touch(&file_key)?;

    info!("Recovered {} as {} ({} aliases migrated)", TRASH, file_key, migrated.len());
    Ok(RecoverResult { file_key, migrated, aliases: applied })
}
