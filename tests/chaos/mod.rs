//! Chaos testing for Quicksave
//!
//! Tampers with the database directory behind the handle's back (deleted
//! data files, stray folders, corrupt manifests, competing handles) and
//! checks that every failure is reported and `clean` brings the database
//! back to a consistent state.

use ::quicksave::storage::{LOCK_FILE, MANIFEST_FILE, SIGNATURE};
use ::quicksave::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use tracing::info;

/// A populated database plus the means to damage it
pub struct ChaosFixture {
    pub work_dir: TempDir,
    pub db_dir: TempDir,
    pub db: Quicksave,
    pub files: Vec<PathBuf>,
    pub rng: StdRng,
}

impl ChaosFixture {
    /// Register `file_count` files and save `saves` extra states for each
    pub fn new(file_count: usize, saves: usize) -> Self {
        let work_dir = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let mut db = Quicksave::init(db_dir.path().join("db")).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut files = Vec::new();

        for i in 0..file_count {
            let path = work_dir.path().join(format!("file{}.dat", i));
            fs::write(&path, random_content(&mut rng)).unwrap();
            db.register(&path, RegisterOptions::default()).unwrap();
            for _ in 0..saves {
                fs::write(&path, random_content(&mut rng)).unwrap();
                db.save(&path, SaveOptions::default()).unwrap();
            }
            files.push(path);
        }

        Self { work_dir, db_dir, db, files, rng }
    }

    pub fn root(&self) -> PathBuf {
        self.db.root().to_path_buf()
    }

    /// Every data file the manifest currently references
    pub fn datafiles(&self) -> Vec<PathBuf> {
        let catalog = self.db.catalog();
        catalog
            .states
            .authoritative()
            .map(|(id, snapshot)| {
                let folder = &catalog.lineage(&id.owner).unwrap().folder;
                self.db.root().join(folder).join(&snapshot.datafile)
            })
            .collect()
    }

    /// Remove `count` referenced data files at random
    pub fn delete_random_datafiles(&mut self, count: usize) -> Vec<PathBuf> {
        let mut datafiles = self.datafiles();
        datafiles.shuffle(&mut self.rng);
        datafiles.truncate(count);
        for path in &datafiles {
            fs::remove_file(path).unwrap();
        }
        datafiles
    }

    /// Close the handle and open the database again
    pub fn reopen(&mut self) {
        let root = self.root();
        self.db = Quicksave::init(self.db_dir.path().join("scratch")).unwrap();
        self.db = Quicksave::open(root).unwrap();
    }
}

fn random_content(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.random_range(1..2048);
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    data
}

/// Every state left in the catalog can still be read back
fn assert_states_readable(db: &Quicksave) {
    let catalog = db.catalog();
    for (id, _) in catalog.states.authoritative() {
        let details = db.show_state(&id.owner, &id.name).unwrap();
        assert!(Path::new(&details.datafile).is_file(), "{} lost its data file", id);
        let lineage = catalog.lineage(&id.owner).unwrap();
        assert!(lineage.datafiles.contains(&catalog.snapshot(id).unwrap().datafile));
    }
}

#[test]
fn test_corrupt_signature() {
    let fixture = ChaosFixture::new(1, 1);
    let root = fixture.root();
    drop(fixture.db);

    let manifest = root.join(MANIFEST_FILE);
    let text = fs::read_to_string(&manifest).unwrap();
    assert!(text.starts_with(SIGNATURE));
    fs::write(&manifest, text.replacen(SIGNATURE, "<SOMETHING ELSE>", 1)).unwrap();

    let result = Quicksave::open(root);
    match result {
        Err(e) => assert!(e.is_corruption(), "unexpected error: {}", e),
        Ok(_) => panic!("opened a database with a bad signature"),
    }
}

#[test]
fn test_garbage_manifest_line() {
    let fixture = ChaosFixture::new(1, 0);
    let root = fixture.root();
    drop(fixture.db);

    let manifest = root.join(MANIFEST_FILE);
    let mut text = fs::read_to_string(&manifest).unwrap();
    text.push_str("{\"this is\": not json\n");
    fs::write(&manifest, text).unwrap();

    assert!(matches!(Quicksave::open(root), Err(QuicksaveError::CorruptDatabase(_))));
}

#[test]
fn test_missing_manifest() {
    let fixture = ChaosFixture::new(1, 0);
    let root = fixture.root();
    drop(fixture.db);

    fs::remove_file(root.join(MANIFEST_FILE)).unwrap();
    assert!(matches!(Quicksave::open(root), Err(QuicksaveError::CorruptDatabase(_))));
}

#[test]
fn test_competing_handles() {
    let fixture = ChaosFixture::new(1, 0);
    let root = fixture.root();
    assert!(root.join(LOCK_FILE).is_file());

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let root = root.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                Quicksave::open(root).map(|_| ())
            })
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(QuicksaveError::DatabaseLocked(_))));
    }

    drop(fixture.db);
    assert!(Quicksave::open(root).is_ok());
}

#[test]
fn test_deleted_datafile_surfaces_as_missing() {
    let mut fixture = ChaosFixture::new(1, 1);
    let path = fixture.files[0].clone();
    let target = fixture.db.lookup(Some("file0_FK1"), "file0_SK1").unwrap();
    let details = fixture.db.show_state("file0_FK1", &target).unwrap();
    fs::remove_file(&details.datafile).unwrap();

    let result = fixture
        .db
        .revert(&path, &target, RevertOptions { stash: false, ..Default::default() });
    match result {
        Err(e @ QuicksaveError::MissingFile { .. }) => {
            assert!(e.user_message().contains("clean --clean-all"));
        }
        other => panic!("expected MissingFile, got {:?}", other),
    }

    let report = fixture.db.clean(CleanOptions { walk: true, ..Default::default() }).unwrap();
    assert_eq!(report.prune_statekeys, vec!["file0_FK1:file0_SK1".to_string()]);
    assert!(fixture.db.lookup(Some("file0_FK1"), "file0_SK1").is_err());
    assert!(fixture.db.lookup(Some("file0_FK1"), "file0_SK2").is_ok());
}

#[test]
fn test_random_datafile_loss() {
    let mut fixture = ChaosFixture::new(4, 3);
    let before = fixture.db.catalog().states.authoritative().count();
    let lost = fixture.delete_random_datafiles(5);
    info!("Deleted {} data files", lost.len());

    let report = fixture.db.clean(CleanOptions::all()).unwrap();
    assert_eq!(report.prune_statekeys.len(), lost.len());
    assert_eq!(fixture.db.catalog().states.authoritative().count(), before - lost.len());
    assert_states_readable(&fixture.db);

    // Every surviving hash alias still resolves
    for (id, entry) in fixture.db.catalog().states.iter() {
        if let Entry::Alias(_) = entry {
            fixture.db.lookup(Some(&id.owner), &id.name).unwrap();
        }
    }

    fixture.reopen();
    let again = fixture.db.clean(CleanOptions::all()).unwrap();
    assert!(again.is_clean(), "second pass still found work: {:?}", again);
}

#[test]
fn test_stray_entries_are_pruned() {
    let mut fixture = ChaosFixture::new(2, 1);
    let root = fixture.root();
    let folder = fixture.db.show_file("file0_FK1").unwrap().folder;

    fs::create_dir_all(root.join("intruder/nested")).unwrap();
    fs::write(root.join("intruder/nested/junk.bin"), b"junk").unwrap();
    fs::write(folder.join("leftover.tmp"), b"junk").unwrap();
    fs::create_dir_all(folder.join("subdir")).unwrap();

    let report = fixture.db.clean(CleanOptions { walk: true, ..Default::default() }).unwrap();
    assert_eq!(report.prune_folders, vec!["intruder".to_string()]);
    assert_eq!(report.prune_files.len(), 2);
    assert!(!root.join("intruder").exists());
    assert!(!folder.join("leftover.tmp").exists());
    assert!(!folder.join("subdir").exists());

    // Top-level files belong to the database itself
    assert!(root.join(MANIFEST_FILE).is_file());
    assert!(root.join(LOCK_FILE).is_file());
    assert_states_readable(&fixture.db);
}

#[test]
fn test_failed_save_leaves_only_a_stray_copy() {
    let mut fixture = ChaosFixture::new(1, 0);
    let path = fixture.files[0].clone();
    let manifest_before = fs::read_to_string(fixture.root().join(MANIFEST_FILE)).unwrap();

    fs::write(&path, b"version two").unwrap();
    fixture
        .db
        .save(&path, SaveOptions { aliases: vec!["v2".to_string()], ..Default::default() })
        .unwrap();
    let manifest_mid = fs::read_to_string(fixture.root().join(MANIFEST_FILE)).unwrap();
    assert_ne!(manifest_before, manifest_mid);

    // Every requested alias collides, so the save is rolled back after copying
    fs::write(&path, b"version three").unwrap();
    let result = fixture
        .db
        .save(&path, SaveOptions { aliases: vec!["v2".to_string()], ..Default::default() });
    assert!(matches!(result, Err(QuicksaveError::NoAliasAvailable)));
    let manifest_after = fs::read_to_string(fixture.root().join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest_mid, manifest_after);

    let report = fixture.db.clean(CleanOptions { walk: true, ..Default::default() }).unwrap();
    assert_eq!(report.prune_files.len(), 1);
    assert!(report.prune_statekeys.is_empty());
    assert_states_readable(&fixture.db);
}

#[cfg(test)]
mod traced {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_loss_then_save_recovers() {
        let mut fixture = ChaosFixture::new(2, 2);
        let lost = fixture.delete_random_datafiles(2);
        info!("Deleted {} data files before saving", lost.len());

        // Saving new content is unaffected by damage elsewhere in the lineage
        let path = fixture.files[0].clone();
        fs::write(&path, b"fresh content after the loss").unwrap();
        let saved = fixture.db.save(&path, SaveOptions::default()).unwrap();
        assert_eq!(saved.file_key, "file0_FK1");

        let report = fixture.db.clean(CleanOptions::all()).unwrap();
        assert_eq!(report.prune_statekeys.len(), lost.len());
        assert_states_readable(&fixture.db);
        assert!(logs_contain("Deleted 2 data files"));
    }

    #[test]
    #[traced_test]
    fn test_reopen_after_walk() {
        let mut fixture = ChaosFixture::new(1, 3);
        let root = fixture.root();
        fs::create_dir_all(root.join("orphan")).unwrap();

        let report = fixture.db.clean(CleanOptions { walk: true, ..Default::default() }).unwrap();
        assert_eq!(report.prune_folders, vec!["orphan".to_string()]);

        fixture.reopen();
        assert_eq!(fixture.db.list(Some("file0_FK1"), None, false).unwrap().len(), 4);
        assert_states_readable(&fixture.db);
    }
}
