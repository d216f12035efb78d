//! Alias graph engine
//!
//! [`Catalog`] wraps the file-key and state-key [`NameTable`]s with the
//! domain rules that keep the graph consistent:
//!
//! - reserved names (`~trash`, `~last`, `~stash`) are refused for user input
//!   but remain writable by internal bookkeeping
//! - every mutating operation ends by repointing `~last` ([`Catalog::touch`])
//! - batches of user aliases are best effort, failing only when none of a
//!   non-empty list could be applied
//! - states are scoped to an owner, and the owner's data file index follows
//!   every state added or removed through this type

use crate::error::{QuicksaveError, Result};
use crate::name_table::NameTable;
use crate::types::{Entry, KeyKind, Lineage, Snapshot, StateId};
use crate::utils;
use std::collections::BTreeSet;
use tracing::debug;

/// Rotating slot for the most recently deleted key
pub const TRASH: &str = "~trash";
/// File alias repointed to the most recently touched lineage
pub const LAST: &str = "~last";
/// Per-lineage slot holding pre-revert content
pub const STASH: &str = "~stash";

/// Names users may not claim as file-keys or file aliases
pub const RESERVED_FILE_KEYS: [&str; 2] = [TRASH, LAST];
/// Names users may not claim as state-keys or state aliases
pub const RESERVED_STATE_KEYS: [&str; 2] = [STASH, TRASH];

/// File-key table type
pub type FileTable = NameTable<String, Lineage>;
/// State-key table type
pub type StateTable = NameTable<StateId, Snapshot>;

/// Whether `name` is reserved in the file-key namespace
pub fn is_reserved_file(name: &str) -> bool {
    RESERVED_FILE_KEYS.contains(&name)
}

/// Whether `name` is reserved in the state-key namespace
pub fn is_reserved_state(name: &str) -> bool {
    RESERVED_STATE_KEYS.contains(&name)
}

/// Refuse a reserved file-key name
pub fn guard_file_name(name: &str) -> Result<()> {
    if is_reserved_file(name) {
        return Err(QuicksaveError::ReservedKey { kind: KeyKind::File, name: name.to_string() });
    }
    Ok(())
}

/// Refuse a reserved state-key name
pub fn guard_state_name(name: &str) -> Result<()> {
    if is_reserved_state(name) {
        return Err(QuicksaveError::ReservedKey { kind: KeyKind::State, name: name.to_string() });
    }
    Ok(())
}

/// Both name tables of a database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    /// File-keys and file aliases
    pub files: FileTable,
    /// State-keys and state aliases
    pub states: StateTable,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a file-key or file alias
    pub fn resolve_file(&self, name: &str) -> Result<String> {
        self.files.resolve(&name.to_string())
    }

    /// Resolve a state name under an authoritative owner
    pub fn resolve_state(&self, owner: &str, name: &str) -> Result<StateId> {
        self.states.resolve(&StateId::new(owner, name))
    }

    /// Payload of an authoritative file-key
    pub fn lineage(&self, file_key: &str) -> Result<&Lineage> {
        self.files
            .payload(&file_key.to_string())
            .ok_or_else(|| QuicksaveError::unknown_file(file_key))
    }

    /// Mutable payload of an authoritative file-key
    pub fn lineage_mut(&mut self, file_key: &str) -> Result<&mut Lineage> {
        self.files
            .payload_mut(&file_key.to_string())
            .ok_or_else(|| QuicksaveError::unknown_file(file_key))
    }

    /// Payload of an authoritative state-key
    pub fn snapshot(&self, id: &StateId) -> Result<&Snapshot> {
        self.states
            .payload(id)
            .ok_or_else(|| QuicksaveError::unknown_state(id.to_string()))
    }

    /// Folder names used by authoritative file-keys
    pub fn folder_names(&self) -> BTreeSet<String> {
        self.files.authoritative().map(|(_, lineage)| lineage.folder.clone()).collect()
    }

    /// Mint and register a file-key for a lineage stored in `folder`
    ///
    /// The key is `{prefix}_FK{n}` where the prefix is taken from `canonical`.
    pub fn create_file_key(&mut self, canonical: &str, folder: &str) -> Result<String> {
        let taken: BTreeSet<String> = self.files.keys().cloned().collect();
        let key = utils::make_key(&utils::key_prefix(canonical, "_FK"), &taken);
        self.files.register_authoritative(key.clone(), Lineage::new(folder))?;
        debug!("Created file key {} in folder {}", key, folder);
        Ok(key)
    }

    /// Local names of every state entry under `owner`
    pub fn state_names_of(&self, owner: &str) -> BTreeSet<String> {
        self.states
            .keys()
            .filter(|id| id.owner == owner)
            .map(|id| id.name.clone())
            .collect()
    }

    /// Mint a fresh state name under `owner`
    pub fn mint_state_name(&self, owner: &str, canonical: &str) -> String {
        utils::make_key(&utils::key_prefix(canonical, "_SK"), &self.state_names_of(owner))
    }

    /// Register an authoritative state and index its data file
    pub fn add_state(&mut self, id: StateId, snapshot: Snapshot) -> Result<()> {
        let datafile = snapshot.datafile.clone();
        let owner = id.owner.clone();
        self.states.register_authoritative(id, snapshot)?;
        self.lineage_mut(&owner)?.datafiles.insert(datafile);
        Ok(())
    }

    /// Remove an authoritative state and drop its data file from the index
    ///
    /// Returns the removed snapshot. Aliases are left in place.
    pub fn remove_state(&mut self, id: &StateId) -> Option<Snapshot> {
        match self.states.remove(id) {
            Some(Entry::Authoritative(snapshot)) => {
                if let Ok(lineage) = self.lineage_mut(&id.owner) {
                    lineage.datafiles.remove(&snapshot.datafile);
                }
                Some(snapshot)
            }
            Some(alias) => {
                self.states.insert(id.clone(), alias);
                None
            }
            None => None,
        }
    }

    /// Add a file alias; authoritative names are skipped
    pub fn add_file_alias(&mut self, alias: &str, target: &str, overwrite: bool) -> Result<bool> {
        self.files.register_alias(alias.to_string(), &target.to_string(), overwrite)
    }

    /// Add a state alias under `owner`; authoritative names are skipped
    pub fn add_state_alias(&mut self, owner: &str, alias: &str, target: &str, overwrite: bool) -> Result<bool> {
        self.states.register_alias(StateId::new(owner, alias), &StateId::new(owner, target), overwrite)
    }

    /// Apply user file aliases with the best-effort batch rule
    ///
    /// Every name is checked against the reserved list before anything is
    /// applied. Collisions are skipped; if `aliases` is non-empty and nothing
    /// was applied the batch fails with [`QuicksaveError::NoAliasAvailable`].
    pub fn apply_file_aliases(&mut self, aliases: &[String], target: &str) -> Result<Vec<String>> {
        aliases.iter().try_for_each(|alias| guard_file_name(alias))?;
        let mut applied = Vec::new();
        for alias in aliases {
            if self.add_file_alias(alias, target, false)? {
                applied.push(alias.clone());
            } else {
                debug!("File alias {} unavailable, skipped", alias);
            }
        }
        batch_outcome(aliases, applied)
    }

    /// Apply user state aliases with the best-effort batch rule
    pub fn apply_state_aliases(
        &mut self,
        owner: &str,
        aliases: &[String],
        target: &str,
        overwrite: bool,
    ) -> Result<Vec<String>> {
        aliases.iter().try_for_each(|alias| guard_state_name(alias))?;
        let mut applied = Vec::new();
        for alias in aliases {
            if self.add_state_alias(owner, alias, target, overwrite)? {
                applied.push(alias.clone());
            } else {
                debug!("State alias {}:{} unavailable, skipped", owner, alias);
            }
        }
        batch_outcome(aliases, applied)
    }

    /// Repoint `~last` at `file_key`
    pub fn touch(&mut self, file_key: &str) -> Result<()> {
        self.files.register_alias(LAST.to_string(), &file_key.to_string(), true)?;
        Ok(())
    }

    /// Look up the state carrying `hash` as an alias under `owner`
    pub fn find_state_by_hash(&self, owner: &str, hash: &str) -> Result<Option<StateId>> {
        let id = StateId::new(owner, hash);
        if !self.states.contains(&id) {
            return Ok(None);
        }
        self.states.resolve(&id).map(Some)
    }

    /// File aliases resolving to `file_key`
    pub fn file_aliases_of(&self, file_key: &str) -> Vec<String> {
        self.files.aliases_of(&file_key.to_string())
    }

    /// State aliases resolving to `id`, as local names
    pub fn state_aliases_of(&self, id: &StateId) -> Vec<String> {
        self.states.aliases_of(id).into_iter().map(|alias| alias.name).collect()
    }

    /// Authoritative states owned by `owner`
    pub fn authoritative_states_of(&self, owner: &str) -> Vec<StateId> {
        self.states
            .authoritative()
            .filter(|(id, _)| id.owner == owner)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Move every state entry from `from` to `to`, rewriting alias links
    pub fn rehome_states(&mut self, from: &str, to: &str) {
        let moved: Vec<StateId> = self.states.keys().filter(|id| id.owner == from).cloned().collect();
        for id in moved {
            if let Some(entry) = self.states.remove(&id) {
                let entry = match entry {
                    Entry::Alias(target) if target.owner == from => Entry::Alias(target.with_owner(to)),
                    other => other,
                };
                self.states.insert(id.with_owner(to), entry);
            }
        }
    }

    /// Drop every state entry owned by `owner`, returning the removed names
    pub fn drop_states_of(&mut self, owner: &str) -> Vec<StateId> {
        let dropped: Vec<StateId> = self.states.keys().filter(|id| id.owner == owner).cloned().collect();
        for id in &dropped {
            self.states.remove(id);
        }
        dropped
    }

    /// Remove every file alias resolving to `file_key`
    pub fn drop_file_aliases_of(&mut self, file_key: &str) -> Vec<String> {
        let aliases = self.file_aliases_of(file_key);
        for alias in &aliases {
            self.files.remove(alias);
        }
        aliases
    }

    /// Remove every state alias resolving to `id`
    pub fn drop_state_aliases_of(&mut self, id: &StateId) -> Vec<StateId> {
        let aliases = self.states.aliases_of(id);
        for alias in &aliases {
            self.states.remove(alias);
        }
        aliases
    }
}

fn batch_outcome(requested: &[String], applied: Vec<String>) -> Result<Vec<String>> {
    if !requested.is_empty() && applied.is_empty() {
        return Err(QuicksaveError::NoAliasAvailable);
    }
    Ok(applied)
}
