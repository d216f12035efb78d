//! Generic name table with alias chain resolution
//!
//! A [`NameTable`] maps names to [`Entry`] values. Authoritative entries hold
//! a payload; alias entries link to another name in the same table. Two
//! instances back the database: one keyed by file-key name and one keyed by
//! [`StateId`].
//!
//! The table knows nothing about reserved names or key kinds beyond what
//! [`TableKey::KIND`] reports for error messages. Domain rules live in
//! [`crate::catalog`].

use crate::error::{QuicksaveError, Result};
use crate::types::{Entry, KeyKind, StateId};
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

/// Key type of a name table
pub trait TableKey: Ord + Clone + fmt::Display + fmt::Debug {
    /// Namespace reported in errors
    const KIND: KeyKind;
}

impl TableKey for String {
    const KIND: KeyKind = KeyKind::File;
}

impl TableKey for StateId {
    const KIND: KeyKind = KeyKind::State;
}

/// Mapping of names to authoritative entries and aliases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTable<K: TableKey, P> {
    entries: BTreeMap<K, Entry<K, P>>,
}

impl<K: TableKey, P> Default for NameTable<K, P> {
    fn default() -> Self {
        Self { entries: BTreeMap::new() }
    }
}

impl<K: TableKey, P> NameTable<K, P> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow alias links from `name` to its authoritative key
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::UnknownKey`] if `name`, or any link on its chain,
    ///   is absent
    /// - [`QuicksaveError::CorruptDatabase`] if the chain loops
    pub fn resolve(&self, name: &K) -> Result<K> {
        let mut current = name;
        // A chain longer than the table must revisit a name
        for _ in 0..=self.entries.len() {
            match self.entries.get(current) {
                None => {
                    return Err(QuicksaveError::UnknownKey {
                        kind: K::KIND,
                        name: current.to_string(),
                    })
                }
                Some(Entry::Authoritative(_)) => return Ok(current.clone()),
                Some(Entry::Alias(target)) => current = target,
            }
        }
        Err(QuicksaveError::corrupt(format!(
            "alias cycle detected while resolving {} {}",
            K::KIND,
            name
        )))
    }

    /// Resolve `name` and borrow the authoritative payload
    pub fn resolve_payload(&self, name: &K) -> Result<(K, &P)> {
        let key = self.resolve(name)?;
        match self.entries.get(&key) {
            Some(Entry::Authoritative(payload)) => Ok((key, payload)),
            _ => Err(QuicksaveError::corrupt(format!("{} {} vanished during resolution", K::KIND, key))),
        }
    }

    /// Raw entry lookup
    pub fn get(&self, name: &K) -> Option<&Entry<K, P>> {
        self.entries.get(name)
    }

    /// Payload of `name` if it is authoritative
    pub fn payload(&self, name: &K) -> Option<&P> {
        self.entries.get(name).and_then(Entry::payload)
    }

    /// Mutable payload of `name` if it is authoritative
    pub fn payload_mut(&mut self, name: &K) -> Option<&mut P> {
        match self.entries.get_mut(name) {
            Some(Entry::Authoritative(payload)) => Some(payload),
            _ => None,
        }
    }

    /// Whether `name` exists in any form
    pub fn contains(&self, name: &K) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether `name` exists and holds a payload
    pub fn is_authoritative(&self, name: &K) -> bool {
        self.entries.get(name).is_some_and(Entry::is_authoritative)
    }

    /// Whether `name` exists and is an alias
    pub fn is_alias(&self, name: &K) -> bool {
        self.entries.get(name).is_some_and(|e| !e.is_authoritative())
    }

    /// Insert a new authoritative entry
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::DuplicateKey`] if `name` already exists
    pub fn register_authoritative(&mut self, name: K, payload: P) -> Result<()> {
        if self.entries.contains_key(&name) {
            return Err(QuicksaveError::DuplicateKey { kind: K::KIND, name: name.to_string() });
        }
        trace!("Registered {} {}", K::KIND, name);
        self.entries.insert(name, Entry::Authoritative(payload));
        Ok(())
    }

    /// Point `name` at the authoritative key behind `target`
    ///
    /// Returns `false` without changing anything when `name` exists and
    /// `overwrite` is not set, when `name` is authoritative, or when `name`
    /// is the resolved target itself.
    ///
    /// # Errors
    ///
    /// - [`QuicksaveError::UnknownKey`] if `target` does not resolve
    pub fn register_alias(&mut self, name: K, target: &K, overwrite: bool) -> Result<bool> {
        let resolved = self.resolve(target)?;
        if name == resolved {
            return Ok(false);
        }
        match self.entries.get(&name) {
            Some(Entry::Authoritative(_)) => return Ok(false),
            Some(Entry::Alias(_)) if !overwrite => return Ok(false),
            _ => {}
        }
        trace!("Aliased {} {} -> {}", K::KIND, name, resolved);
        self.entries.insert(name, Entry::Alias(resolved));
        Ok(true)
    }

    /// Set an entry without any checks
    ///
    /// Used when loading a manifest and when bookkeeping moves payloads or
    /// links between names.
    pub fn insert(&mut self, name: K, entry: Entry<K, P>) -> Option<Entry<K, P>> {
        self.entries.insert(name, entry)
    }

    /// Remove an entry; dependent entries are left alone
    pub fn remove(&mut self, name: &K) -> Option<Entry<K, P>> {
        self.entries.remove(name)
    }

    /// Every alias that resolves to `target`, in name order
    pub fn aliases_of(&self, target: &K) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_authoritative())
            .filter(|(name, _)| self.resolve(name).is_ok_and(|resolved| &resolved == target))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every alias whose direct link is `target`
    pub fn direct_aliases_of(&self, target: &K) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.alias_target() == Some(target))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Keep only the entries matching `f`
    pub fn retain(&mut self, f: impl FnMut(&K, &mut Entry<K, P>) -> bool) {
        self.entries.retain(f);
    }

    /// Iterate over every entry in name order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &Entry<K, P>)> {
        self.entries.iter()
    }

    /// Iterate over authoritative entries and their payloads
    pub fn authoritative(&self) -> impl Iterator<Item = (&K, &P)> {
        self.entries.iter().filter_map(|(name, entry)| entry.payload().map(|p| (name, p)))
    }

    /// Iterate over names
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
