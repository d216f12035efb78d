//! End-to-end integration tests for Quicksave
//!
//! Each test drives a real database on disk through the public handle and
//! checks both the returned results and the resulting key graph.

use ::quicksave::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Test harness owning a working directory and a database
pub struct QuicksaveTestHarness {
    pub work_dir: TempDir,
    pub db_dir: TempDir,
    pub db: Quicksave,
    rng: StdRng,
}

impl QuicksaveTestHarness {
    /// Create a new test harness
    pub fn new() -> Self {
        let work_dir = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let db = Quicksave::init(db_dir.path().join("qs")).unwrap();
        Self { work_dir, db_dir, db, rng: StdRng::seed_from_u64(42) }
    }

    /// Write `content` to `name` inside the working directory
    pub fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.work_dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Random bytes of the given length
    pub fn random_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        self.rng.fill(&mut data[..]);
        data
    }

    /// The file-key `~last` currently points at
    pub fn last(&self) -> String {
        self.db.lookup(None, "~last").unwrap()
    }

    /// Close the handle and open the database again
    pub fn reopen(&mut self) {
        let root = self.db.root().to_path_buf();
        // Swap in a throwaway handle so the lock on `root` is released first
        self.db = Quicksave::init(self.db_dir.path().join("scratch")).unwrap();
        self.db = Quicksave::open(root).unwrap();
    }
}

fn absolute(path: &Path) -> String {
    std::path::absolute(path).unwrap().to_string_lossy().into_owned()
}

#[test]
fn test_register_random_file() {
    let mut harness = QuicksaveTestHarness::new();
    let data = harness.random_bytes(4096);
    let path = harness.write("A.bin", &data);

    let result = harness.db.register(&path, RegisterOptions::default()).unwrap();
    info!("Registered {:?}", result);

    assert_eq!(result.file_key, "Abin_FK1");
    assert_eq!(result.state_key, "Abin_SK1");
    assert_eq!(result.hash.len(), 64);

    // Path and basename aliases
    assert!(result.file_aliases.contains(&absolute(&path)));
    assert!(result.file_aliases.contains(&"A.bin".to_string()));
    assert_eq!(harness.db.lookup(None, &absolute(&path)).unwrap(), "Abin_FK1");
    assert_eq!(harness.db.lookup(None, "A.bin").unwrap(), "Abin_FK1");

    // Short and full hash aliases on the initial state
    let short = &result.hash[..7];
    assert_eq!(result.state_aliases, vec![short.to_string()]);
    assert_eq!(harness.db.lookup(Some("Abin_FK1"), short).unwrap(), "Abin_SK1");
    assert_eq!(harness.db.lookup(Some("A.bin"), &result.hash).unwrap(), "Abin_SK1");

    // The stored copy is byte-identical
    let details = harness.db.show_state("Abin_FK1", "Abin_SK1").unwrap();
    assert_eq!(details.size, 4096);
    assert_eq!(fs::read(&details.datafile).unwrap(), data);
    assert_eq!(harness.last(), "Abin_FK1");
}

#[test]
fn test_save_and_duplicate_detection() {
    let mut harness = QuicksaveTestHarness::new();
    let first = harness.random_bytes(4096);
    let path = harness.write("A.bin", &first);
    harness.db.register(&path, RegisterOptions::default()).unwrap();

    let second = harness.random_bytes(4096);
    fs::write(&path, &second).unwrap();
    let saved = harness
        .db
        .save(&path, SaveOptions { aliases: vec!["v2".to_string()], ..Default::default() })
        .unwrap();
    assert_eq!(saved.file_key, "Abin_FK1");
    assert!(saved.inferred);
    assert_eq!(saved.state_key, "Abin_SK2");
    assert!(saved.aliases.contains(&"v2".to_string()));
    assert!(saved.aliases.contains(&saved.hash[..7].to_string()));

    // Same content again
    let result = harness.db.save(&path, SaveOptions::default());
    match result {
        Err(QuicksaveError::DuplicateState { state }) => assert_eq!(state, "Abin_SK2"),
        other => panic!("expected DuplicateState, got {:?}", other),
    }

    // The failed save left nothing behind
    let states = harness.db.list(Some("Abin_FK1"), None, false).unwrap();
    assert_eq!(states.len(), 2);
}

#[test]
fn test_revert_with_stash() {
    let mut harness = QuicksaveTestHarness::new();
    let original = harness.random_bytes(4096);
    let path = harness.write("A.bin", &original);
    let registered = harness.db.register(&path, RegisterOptions::default()).unwrap();

    let edited = harness.random_bytes(2048);
    fs::write(&path, &edited).unwrap();
    harness.db.save(&path, SaveOptions::default()).unwrap();

    let reverted = harness
        .db
        .revert(&path, &registered.state_key, RevertOptions::default())
        .unwrap();
    assert_eq!(reverted.state, "Abin_SK1");
    assert!(reverted.stashed);
    assert_eq!(fs::read(&path).unwrap(), original);

    // The saved content was already a known state, so ~stash just points at it
    assert_eq!(harness.db.lookup(Some("Abin_FK1"), "~stash").unwrap(), "Abin_SK2");

    // Unsaved content is copied into ~stash
    let scratch = harness.random_bytes(100);
    fs::write(&path, &scratch).unwrap();
    harness.db.revert(&path, "Abin_SK2", RevertOptions::default()).unwrap();
    assert_eq!(fs::read(&path).unwrap(), edited);
    assert_eq!(harness.db.lookup(Some("Abin_FK1"), "~stash").unwrap(), "~stash");

    harness.db.revert(&path, "~stash", RevertOptions::default()).unwrap();
    assert_eq!(fs::read(&path).unwrap(), scratch);
}

#[test]
fn test_revert_idempotence() {
    let mut harness = QuicksaveTestHarness::new();
    let data = harness.random_bytes(512);
    let path = harness.write("A.bin", &data);
    let registered = harness.db.register(&path, RegisterOptions::default()).unwrap();

    let result = harness.db.revert(&path, &registered.state_key, RevertOptions::default());
    assert!(matches!(result, Err(QuicksaveError::AlreadyInState { .. })));

    let forced = harness
        .db
        .revert(&path, &registered.state_key, RevertOptions { force: true, ..Default::default() })
        .unwrap();
    assert_eq!(forced.state, registered.state_key);
    assert_eq!(fs::read(&path).unwrap(), data);
}

#[test]
fn test_delete_and_recover() {
    let mut harness = QuicksaveTestHarness::new();
    let data = harness.random_bytes(4096);
    let path = harness.write("A.bin", &data);
    harness
        .db
        .register(&path, RegisterOptions { file_aliases: vec!["alpha".to_string()], ..Default::default() })
        .unwrap();

    let deleted = harness.db.delete_key(None, "Abin_FK1", DeleteOptions::default()).unwrap();
    assert!(deleted.trashed);
    assert_eq!(harness.db.lookup(None, "alpha").unwrap(), "~trash");
    assert_eq!(harness.db.lookup(None, "A.bin").unwrap(), "~trash");
    assert!(matches!(
        harness.db.lookup(None, "Abin_FK1"),
        Err(QuicksaveError::UnknownKey { .. })
    ));
    assert_eq!(harness.last(), "~trash");

    let recovered = harness.db.recover(&["beta".to_string()]).unwrap();
    assert_eq!(recovered.aliases, vec!["beta".to_string()]);
    for alias in ["alpha".to_string(), "A.bin".to_string(), absolute(&path)] {
        assert!(recovered.migrated.contains(&alias), "{} was not migrated", alias);
        assert_eq!(harness.db.lookup(None, &alias).unwrap(), recovered.file_key);
    }
    assert!(!recovered.migrated.contains(&"~last".to_string()));
    assert_eq!(harness.last(), recovered.file_key);

    // States came back with the lineage
    assert_eq!(harness.db.lookup(Some("beta"), "Abin_SK1").unwrap(), "Abin_SK1");
    fs::write(&path, b"changed").unwrap();
    harness.db.revert(&path, "Abin_SK1", RevertOptions::default()).unwrap();
    assert_eq!(fs::read(&path).unwrap(), data);
}

#[test]
fn test_deduplicate_forwards_aliases() {
    let mut harness = QuicksaveTestHarness::new();
    let data = harness.random_bytes(1024);
    let path = harness.write("A.bin", &data);
    harness.db.register(&path, RegisterOptions::default()).unwrap();

    let twin = harness
        .db
        .save(
            &path,
            SaveOptions { aliases: vec!["twin".to_string()], allow_duplicate: true, ..Default::default() },
        )
        .unwrap();
    assert_eq!(twin.state_key, "Abin_SK2");

    let report = harness
        .db
        .clean(CleanOptions { deduplicate: true, ..Default::default() })
        .unwrap();
    assert_eq!(report.deduplicate.len(), 1);
    assert_eq!(
        report.deduplicate.get("Abin_FK1:Abin_SK2").map(String::as_str),
        Some("Abin_FK1:Abin_SK1")
    );
    assert!(report.forwarded >= 1);

    assert_eq!(harness.db.lookup(Some("Abin_FK1"), "twin").unwrap(), "Abin_SK1");
    let states = harness.db.list(Some("Abin_FK1"), None, false).unwrap();
    assert_eq!(states.len(), 1);

    // Nothing left to merge
    let again = harness
        .db
        .clean(CleanOptions { deduplicate: true, ..Default::default() })
        .unwrap();
    assert!(again.deduplicate.is_empty());
}

#[test]
fn test_walk_drops_file_key_without_folder() {
    let mut harness = QuicksaveTestHarness::new();
    let data = harness.random_bytes(256);
    let path = harness.write("A.bin", &data);
    harness.db.register(&path, RegisterOptions::default()).unwrap();
    fs::write(&path, b"second").unwrap();
    harness.db.save(&path, SaveOptions::default()).unwrap();

    let other = harness.write("B.bin", b"keep me");
    harness.db.register(&other, RegisterOptions::default()).unwrap();

    let folder = harness.db.show_file("Abin_FK1").unwrap().folder;
    fs::remove_dir_all(&folder).unwrap();

    let report = harness
        .db
        .clean(CleanOptions { walk: true, ..Default::default() })
        .unwrap();
    assert_eq!(report.prune_filekeys, vec!["Abin_FK1".to_string()]);

    assert!(matches!(harness.db.lookup(None, "A.bin"), Err(QuicksaveError::UnknownKey { .. })));
    assert!(harness.db.catalog().states.keys().all(|id| id.owner != "Abin_FK1"));
    assert_eq!(harness.db.lookup(None, "B.bin").unwrap(), "Bbin_FK1");
}

#[test]
fn test_last_follows_every_mutation() {
    let mut harness = QuicksaveTestHarness::new();
    let a = harness.write("a.txt", b"a");
    let b = harness.write("b.txt", b"b");

    harness.db.register(&a, RegisterOptions::default()).unwrap();
    assert_eq!(harness.last(), "atxt_FK1");
    harness.db.register(&b, RegisterOptions::default()).unwrap();
    assert_eq!(harness.last(), "btxt_FK1");

    fs::write(&a, b"a2").unwrap();
    harness.db.save(&a, SaveOptions::default()).unwrap();
    assert_eq!(harness.last(), "atxt_FK1");

    harness
        .db
        .alias(AliasRequest::CreateStateAlias {
            link: "first".to_string(),
            target: "btxt_SK1".to_string(),
            file_key: "b.txt".to_string(),
        })
        .unwrap();
    assert_eq!(harness.last(), "btxt_FK1");

    harness.db.revert(&a, "atxt_SK1", RevertOptions::default()).unwrap();
    assert_eq!(harness.last(), "atxt_FK1");
}

#[test]
fn test_state_survives_reopen() {
    let mut harness = QuicksaveTestHarness::new();
    let data = harness.random_bytes(300);
    let path = harness.write("A.bin", &data);
    harness.db.register(&path, RegisterOptions::default()).unwrap();
    harness
        .db
        .alias(AliasRequest::CreateFileAlias { link: "alpha".to_string(), target: "Abin_FK1".to_string() })
        .unwrap();
    harness.db.config_set("revert.stash", "off", false).unwrap();

    harness.reopen();

    assert_eq!(harness.db.lookup(None, "alpha").unwrap(), "Abin_FK1");
    assert_eq!(harness.db.check_flag("revert.stash", "on"), "off");

    // With stashing disabled in the database, revert keeps no copy
    fs::write(&path, b"scratch").unwrap();
    let reverted = harness.db.revert(&path, "Abin_SK1", RevertOptions::default()).unwrap();
    assert!(!reverted.stashed);
    assert!(harness.db.lookup(Some("Abin_FK1"), "~stash").is_err());
}
