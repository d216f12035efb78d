//! Integrity scanner and garbage collector
//!
//! `clean` repairs drift between the manifest and itself, and between the
//! manifest and the database directory. Passes run in a fixed order:
//!
//! 1. orphan states (owner is not an authoritative file-key)
//! 2. dangling aliases (alias chain ends at a missing name)
//! 3. data file index rebuild
//! 4. filesystem walk
//! 5. `~trash` purge
//! 6. deduplication
//!
//! Every pass records what it removed in the returned [`CleanReport`].

use crate::catalog::{Catalog, TRASH};
use crate::error::{QuicksaveError, Result};
use crate::name_table::{NameTable, TableKey};
use crate::storage::Storage;
use crate::types::{CleanOptions, CleanReport, Entry, StateId, TrashStateReport};
use crate::utils;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Run the selected passes against `catalog`
pub(crate) fn clean(storage: &Storage, catalog: &mut Catalog, options: &CleanOptions) -> Result<CleanReport> {
    if options.is_empty() {
        return Err(QuicksaveError::NoCleanOperationSelected);
    }
    let start = Instant::now();
    let mut report = CleanReport::default();

    if options.orphan_states {
        report.states = sweep_orphan_states(catalog);
    }
    if options.dangling_aliases {
        let (files, states) = sweep_dangling_aliases(catalog)?;
        report.file_aliases = files;
        report.state_aliases = states;
    }
    if options.rebuild_index {
        report.rebuilt = rebuild_index(catalog);
    }
    if options.walk {
        walk_database(storage, catalog, &mut report)?;
    }
    if options.trash {
        purge_trash(storage, catalog, &mut report)?;
    }
    if options.deduplicate {
        deduplicate(storage, catalog, &mut report)?;
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!("Clean complete in {}ms (clean: {})", report.duration_ms, report.is_clean());
    Ok(report)
}

/// Remove every state entry whose owner is not an authoritative file-key
fn sweep_orphan_states(catalog: &mut Catalog) -> Vec<String> {
    let orphans: Vec<StateId> = catalog
        .states
        .keys()
        .filter(|id| !catalog.files.is_authoritative(&id.owner))
        .cloned()
        .collect();
    for id in &orphans {
        catalog.states.remove(id);
    }
    debug!("Removed {} orphaned state entries", orphans.len());
    orphans.iter().map(ToString::to_string).collect()
}

fn dangling<K: TableKey, P>(table: &NameTable<K, P>) -> Result<Vec<K>> {
    let mut found = Vec::new();
    for (name, entry) in table.iter() {
        if entry.is_authoritative() {
            continue;
        }
        match table.resolve(name) {
            Ok(_) => {}
            Err(QuicksaveError::UnknownKey { .. }) => found.push(name.clone()),
            Err(e) => return Err(e),
        }
    }
    Ok(found)
}

/// Remove aliases that do not resolve, until none are left
fn sweep_dangling_aliases(catalog: &mut Catalog) -> Result<(Vec<String>, Vec<String>)> {
    let mut files = Vec::new();
    let mut states = Vec::new();
    loop {
        let file_batch = dangling(&catalog.files)?;
        let state_batch = dangling(&catalog.states)?;
        if file_batch.is_empty() && state_batch.is_empty() {
            break;
        }
        for name in file_batch {
            catalog.files.remove(&name);
            files.push(name);
        }
        for id in state_batch {
            catalog.states.remove(&id);
            states.push(id.to_string());
        }
    }
    debug!("Removed {} dangling file aliases, {} dangling state aliases", files.len(), states.len());
    Ok((files, states))
}

/// Data files referenced by authoritative states, grouped by owner
fn expected_datafiles(catalog: &Catalog) -> BTreeMap<String, BTreeSet<String>> {
    let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (id, snapshot) in catalog.states.authoritative() {
        expected.entry(id.owner.clone()).or_default().insert(snapshot.datafile.clone());
    }
    expected
}

/// Recompute every lineage's data file index, returning how many changed
fn rebuild_index(catalog: &mut Catalog) -> usize {
    let mut expected = expected_datafiles(catalog);
    let owners: Vec<String> = catalog.files.authoritative().map(|(key, _)| key.clone()).collect();

    let mut rebuilt = 0;
    for owner in owners {
        let datafiles = expected.remove(&owner).unwrap_or_default();
        if let Some(lineage) = catalog.files.payload_mut(&owner) {
            if lineage.datafiles != datafiles {
                debug!("Rebuilt data file index of {}", owner);
                lineage.datafiles = datafiles;
                rebuilt += 1;
            }
        }
    }
    rebuilt
}

fn remove_path(path: &std::path::Path, is_dir: bool) -> Result<()> {
    if is_dir {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Drop a file-key with its aliases and every state it owns
fn forget_file_key(catalog: &mut Catalog, file_key: &str) {
    catalog.drop_file_aliases_of(file_key);
    catalog.files.remove(&file_key.to_string());
    catalog.drop_states_of(file_key);
}

/// Reconcile the manifest with the directory tree
fn walk_database(storage: &Storage, catalog: &mut Catalog, report: &mut CleanReport) -> Result<()> {
    let tracked: BTreeMap<String, String> = catalog
        .files
        .authoritative()
        .map(|(key, lineage)| (lineage.folder.clone(), key.clone()))
        .collect();

    for entry in WalkDir::new(storage.root()).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !tracked.contains_key(&name) {
            fs::remove_dir_all(entry.path())?;
            debug!("Removed untracked folder {}", name);
            report.prune_folders.push(name);
        }
    }

    for (folder, file_key) in &tracked {
        if !storage.folder_path(folder).is_dir() {
            warn!("Folder {} of {} is missing, dropping the file key", folder, file_key);
            forget_file_key(catalog, file_key);
            report.prune_filekeys.push(file_key.clone());
        }
    }

    let expected = expected_datafiles(catalog);
    let empty = BTreeSet::new();
    for (folder, file_key) in &tracked {
        if report.prune_filekeys.contains(file_key) {
            continue;
        }
        let wanted = expected.get(file_key).unwrap_or(&empty);
        let mut seen = BTreeSet::new();

        for entry in WalkDir::new(storage.folder_path(folder)).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().is_file() && wanted.contains(&name) {
                seen.insert(name);
                continue;
            }
            remove_path(entry.path(), entry.file_type().is_dir())?;
            debug!("Removed untracked {}/{}", folder, name);
            report.prune_files.push(format!("{}/{}", folder, name));
        }

        let missing: Vec<StateId> = catalog
            .states
            .authoritative()
            .filter(|(id, snapshot)| &id.owner == file_key && !seen.contains(&snapshot.datafile))
            .map(|(id, _)| id.clone())
            .collect();
        for id in missing {
            warn!("Data file of {} is missing, dropping the state", id);
            catalog.drop_state_aliases_of(&id);
            catalog.remove_state(&id);
            report.prune_statekeys.push(id.to_string());
        }
    }
    Ok(())
}

/// Purge the file-level and per-lineage `~trash` slots
fn purge_trash(storage: &Storage, catalog: &mut Catalog, report: &mut CleanReport) -> Result<()> {
    let trash = TRASH.to_string();
    let mut state_report = TrashStateReport::default();

    if catalog.files.is_authoritative(&trash) {
        let aliases = catalog.drop_file_aliases_of(TRASH);
        if let Some(Entry::Authoritative(lineage)) = catalog.files.remove(&trash) {
            storage.remove_folder(&lineage.folder)?;
        }
        report.trash_file = Some(aliases.len());
    }

    let scoped: Vec<StateId> = catalog.states.keys().filter(|id| id.owner == TRASH).cloned().collect();
    for id in scoped {
        match catalog.states.remove(&id) {
            Some(Entry::Authoritative(_)) => state_report.keys += 1,
            Some(Entry::Alias(_)) => state_report.aliases += 1,
            None => {}
        }
    }

    let slots: Vec<StateId> = catalog
        .states
        .authoritative()
        .filter(|(id, _)| id.name == TRASH)
        .map(|(id, _)| id.clone())
        .collect();
    for slot in slots {
        state_report.aliases += catalog.drop_state_aliases_of(&slot).len();
        if let Some(snapshot) = catalog.remove_state(&slot) {
            if let Ok(lineage) = catalog.lineage(&slot.owner) {
                storage.remove_file(&lineage.folder, &snapshot.datafile)?;
            }
        }
        state_report.keys += 1;
    }

    if state_report != TrashStateReport::default() {
        report.trash_state = Some(state_report);
    }
    Ok(())
}

/// Collapse states of one lineage that hold identical content
fn deduplicate(storage: &Storage, catalog: &mut Catalog, report: &mut CleanReport) -> Result<()> {
    let candidates: Vec<(StateId, PathBuf)> = catalog
        .states
        .authoritative()
        .filter_map(|(id, snapshot)| {
            let lineage = catalog.files.payload(&id.owner)?;
            Some((id.clone(), storage.datafile_path(&lineage.folder, &snapshot.datafile)))
        })
        .collect();

    let hashed: Vec<(StateId, Option<String>)> = candidates
        .par_iter()
        .map(|(id, path)| match utils::hash_file_content(path) {
            Ok(hash) => Ok((id.clone(), Some(hash))),
            Err(QuicksaveError::MissingFile { .. }) => {
                warn!("Data file of {} is missing, skipping", id);
                Ok((id.clone(), None))
            }
            Err(e) => Err(e),
        })
        .collect::<Result<_>>()?;

    let mut kept: BTreeMap<(String, String), StateId> = BTreeMap::new();
    for (id, hash) in hashed {
        let Some(hash) = hash else { continue };
        let slot = (id.owner.clone(), hash.clone());
        let Some(survivor) = kept.get(&slot).cloned() else {
            kept.insert(slot, id);
            continue;
        };

        for alias in catalog.states.direct_aliases_of(&id) {
            catalog.states.insert(alias, Entry::Alias(survivor.clone()));
            report.forwarded += 1;
        }
        if let Some(snapshot) = catalog.remove_state(&id) {
            let folder = catalog.lineage(&id.owner)?.folder.clone();
            storage.remove_file(&folder, &snapshot.datafile)?;
        }
        debug!("Merged duplicate {} into {}", id, survivor);
        report.deduplicate.insert(id.to_string(), survivor.to_string());
    }

    for ((owner, hash), survivor) in kept {
        catalog.add_state_alias(&owner, &hash, &survivor.name, false)?;
        let short = utils::short_hash(&hash);
        if !catalog.states.contains(&StateId::new(&owner, short)) {
            catalog.add_state_alias(&owner, short, &survivor.name, false)?;
        }
    }
    Ok(())
}
