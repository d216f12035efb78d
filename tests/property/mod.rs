//! Property-based testing for Quicksave
//!
//! Uses proptest to check the alias graph and manifest invariants across
//! randomly generated key sets and operation sequences.

use ::quicksave::storage::{decode_manifest, encode_manifest};
use ::quicksave::*;
use chrono::DateTime;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tempfile::TempDir;

/// An operation on the file table's alias graph
#[derive(Debug, Clone)]
pub enum AliasOperation {
    Create { alias: usize, target: usize, overwrite: bool },
    Delete { alias: usize },
}

/// Names drawn from a small pool so operations collide often
const POOL: usize = 12;

fn name(index: usize) -> String {
    format!("n{}", index % POOL)
}

fn alias_operation_strategy() -> impl Strategy<Value = AliasOperation> {
    prop_oneof![
        3 => (0..POOL, 0..POOL, any::<bool>()).prop_map(|(alias, target, overwrite)| {
            AliasOperation::Create { alias, target, overwrite }
        }),
        1 => (0..POOL).prop_map(|alias| AliasOperation::Delete { alias }),
    ]
}

/// A catalog with `keys` authoritative file-keys, each owning a few states
fn seeded_catalog(keys: usize, states_per_key: usize) -> Catalog {
    let mut catalog = Catalog::new();
    let created_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    for k in 0..keys {
        let file_key = name(k);
        catalog
            .files
            .register_authoritative(file_key.clone(), Lineage::new(format!("folder{}", k)))
            .unwrap();
        for s in 0..states_per_key {
            let snapshot = Snapshot { datafile: format!("data{}.txt", s), created_at };
            catalog.add_state(StateId::new(&file_key, format!("s{}", s)), snapshot).unwrap();
        }
    }
    catalog
}

/// Apply an operation, ignoring the outcome
fn apply(catalog: &mut Catalog, op: &AliasOperation) {
    match op {
        AliasOperation::Create { alias, target, overwrite } => {
            let _ = catalog.add_file_alias(&name(*alias), &name(*target), *overwrite);
        }
        AliasOperation::Delete { alias } => {
            if catalog.files.is_alias(&name(*alias)) {
                catalog.files.remove(&name(*alias));
            }
        }
    }
}

fn valid_alias() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.-]{0,8}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every name either resolves to an authoritative key or is unknown
    #[test]
    fn resolution_always_terminates(
        keys in 1..4usize,
        operations in prop::collection::vec(alias_operation_strategy(), 1..60)
    ) {
        let mut catalog = seeded_catalog(keys, 0);
        for op in &operations {
            apply(&mut catalog, op);

            for i in 0..POOL {
                match catalog.resolve_file(&name(i)) {
                    Ok(key) => prop_assert!(catalog.files.is_authoritative(&key)),
                    Err(QuicksaveError::UnknownKey { .. }) => {}
                    Err(e) => prop_assert!(false, "unexpected error resolving {}: {}", name(i), e),
                }
            }
        }
    }

    /// Aliases created through the table never point at another alias
    #[test]
    fn aliases_store_resolved_targets(
        operations in prop::collection::vec(alias_operation_strategy(), 1..60)
    ) {
        let mut catalog = seeded_catalog(3, 0);
        for op in &operations {
            apply(&mut catalog, op);
        }
        for (alias, entry) in catalog.files.iter() {
            if let Entry::Alias(target) = entry {
                prop_assert!(
                    catalog.files.is_authoritative(target),
                    "{} links to non-authoritative {}", alias, target
                );
            }
        }
    }

    /// Encoding then decoding a manifest preserves every entry and flag
    #[test]
    fn manifest_round_trip(
        keys in 1..5usize,
        states_per_key in 0..4usize,
        operations in prop::collection::vec(alias_operation_strategy(), 0..30),
        state_aliases in prop::collection::btree_map(valid_alias(), (0..5usize, 0..4usize), 0..10),
        flags in prop::collection::btree_map("[a-z]{1,6}\\.[a-z]{1,6}", "[a-z0-9 ]{0,6}", 0..4)
    ) {
        let mut catalog = seeded_catalog(keys, states_per_key);
        for op in &operations {
            apply(&mut catalog, op);
        }
        if states_per_key > 0 {
            for (alias, (k, s)) in &state_aliases {
                let owner = name(k % keys);
                let target = format!("s{}", s % states_per_key);
                let _ = catalog.add_state_alias(&owner, alias, &target, false);
            }
        }

        let text = encode_manifest(&catalog, &flags).unwrap();
        let manifest = decode_manifest(&text).unwrap();

        prop_assert_eq!(&manifest.catalog, &catalog);
        prop_assert_eq!(&manifest.flags, &flags);
        for key in catalog.files.keys() {
            prop_assert_eq!(
                manifest.catalog.resolve_file(key).ok(),
                catalog.resolve_file(key).ok()
            );
        }
    }

    /// The batch rule: collisions are skipped, and an all-colliding batch fails
    #[test]
    fn batch_alias_policy(
        taken in prop::collection::btree_set(valid_alias(), 0..6),
        requested in prop::collection::btree_set(valid_alias(), 1..6)
    ) {
        let mut catalog = seeded_catalog(2, 0);
        for alias in &taken {
            catalog.add_file_alias(alias, &name(1), false).unwrap();
        }
        let before = catalog.clone();

        let requested: Vec<String> = requested.into_iter().collect();
        let expected: Vec<String> = requested
            .iter()
            .filter(|alias| !catalog.files.contains(alias))
            .cloned()
            .collect();

        match catalog.apply_file_aliases(&requested, &name(0)) {
            Ok(applied) => {
                prop_assert_eq!(&applied, &expected);
                for alias in &applied {
                    prop_assert_eq!(catalog.resolve_file(alias).unwrap(), name(0));
                }
                for alias in &taken {
                    prop_assert_eq!(catalog.resolve_file(alias).ok(), before.resolve_file(alias).ok());
                }
            }
            Err(QuicksaveError::NoAliasAvailable) => {
                prop_assert!(expected.is_empty());
                prop_assert_eq!(&catalog, &before);
            }
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Saving distinct contents and reopening keeps every state restorable
    #[test]
    fn saved_states_restore_after_reopen(
        contents in prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..512), 1..6)
    ) {
        let work = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let root = db_dir.path().join("db");
        let path = work.path().join("data.bin");

        let mut saved = BTreeMap::new();
        {
            let mut db = Quicksave::init(root.clone()).unwrap();
            for (i, content) in contents.iter().enumerate() {
                fs::write(&path, content).unwrap();
                let state = if i == 0 {
                    db.register(&path, RegisterOptions::default()).unwrap().state_key
                } else {
                    db.save(&path, SaveOptions::default()).unwrap().state_key
                };
                saved.insert(state, content.clone());
            }
        }

        let mut db = Quicksave::open(root).unwrap();
        let names: BTreeSet<String> = db
            .list(Some("databin_FK1"), None, false)
            .unwrap()
            .into_iter()
            .map(|row| row.name)
            .collect();
        prop_assert_eq!(&names, &saved.keys().cloned().collect::<BTreeSet<_>>());

        for (state, content) in &saved {
            let options = RevertOptions { stash: false, force: true, ..Default::default() };
            db.revert(&path, state, options).unwrap();
            prop_assert_eq!(&fs::read(&path).unwrap(), content);
        }
    }
}
