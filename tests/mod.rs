//! Main test module for Quicksave
//!
//! This module includes all test suites:
//! - Integration tests for the end-to-end lifecycle scenarios
//! - Chaos tests for out-of-band tampering and concurrent handles
//! - Property-based tests for alias and manifest invariants

pub mod integration;
pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::quicksave::*;
    use std::fs;
    use tempfile::TempDir;

    fn open_db(db_dir: &TempDir) -> Quicksave {
        Quicksave::init(db_dir.path().join("db")).unwrap()
    }

    #[test]
    fn test_empty_file() {
        let work = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let mut db = open_db(&db_dir);

        let path = work.path().join("empty.log");
        fs::write(&path, b"").unwrap();

        let registered = db.register(&path, RegisterOptions::default()).unwrap();
        assert_eq!(registered.file_key, "empty_FK1");
        // SHA-256 of no bytes
        assert_eq!(
            registered.hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        fs::write(&path, b"now with content").unwrap();
        db.save(&path, SaveOptions::default()).unwrap();
        db.revert(&path, &registered.state_key, RevertOptions::default()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_special_filenames() {
        let work = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let mut db = open_db(&db_dir);

        let special_names = vec![
            ("file with spaces.txt", "files_FK1"),
            ("file-with-dashes.txt", "filew_FK1"),
            (".hidden", "hidde_FK1"),
            ("...", "file_FK1"),
        ];

        for (name, expected) in special_names {
            let path = work.path().join(name);
            if fs::write(&path, format!("Content of {}", name)).is_err() {
                // Skip if OS doesn't support this filename
                continue;
            }
            let registered = db.register(&path, RegisterOptions::default()).unwrap();
            assert_eq!(registered.file_key, expected, "key for {:?}", name);
            assert_eq!(db.lookup(None, name).unwrap(), expected);
        }
    }

    #[test]
    fn test_same_basename_in_two_directories() {
        let work = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let mut db = open_db(&db_dir);

        fs::create_dir_all(work.path().join("left")).unwrap();
        fs::create_dir_all(work.path().join("right")).unwrap();
        let left = work.path().join("left/notes.txt");
        let right = work.path().join("right/notes.txt");
        fs::write(&left, "left").unwrap();
        fs::write(&right, "right").unwrap();

        let first = db.register(&left, RegisterOptions::default()).unwrap();
        let second = db.register(&right, RegisterOptions::default()).unwrap();
        assert_eq!(first.file_key, "notes_FK1");
        assert_eq!(second.file_key, "notes_FK2");

        // The basename stays with the first registration, each path with its own key
        assert_eq!(db.lookup(None, "notes.txt").unwrap(), "notes_FK1");
        assert!(!second.file_aliases.contains(&"notes.txt".to_string()));
        let status = db.status(&right, None).unwrap();
        assert_eq!(status.file_key, "notes_FK2");
        assert!(status.inferred);

        // Separate storage folders
        let left_folder = db.show_file("notes_FK1").unwrap().folder;
        let right_folder = db.show_file("notes_FK2").unwrap().folder;
        assert_ne!(left_folder, right_folder);
    }

    #[test]
    fn test_reserved_names_rejected_everywhere() {
        let work = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let mut db = open_db(&db_dir);

        let path = work.path().join("x.cfg");
        fs::write(&path, "x").unwrap();

        let result = db.register(
            &path,
            RegisterOptions { file_aliases: vec!["~last".to_string()], ..Default::default() },
        );
        assert!(matches!(result, Err(QuicksaveError::ReservedKey { .. })));

        let registered = db.register(&path, RegisterOptions::default()).unwrap();
        fs::write(&path, "y").unwrap();
        let result = db.save(&path, SaveOptions { aliases: vec!["~stash".to_string()], ..Default::default() });
        assert!(matches!(result, Err(QuicksaveError::ReservedKey { .. })));

        let result = db.alias(AliasRequest::CreateFileAlias {
            link: "~trash".to_string(),
            target: registered.file_key.clone(),
        });
        assert!(matches!(result, Err(QuicksaveError::ReservedKey { .. })));

        let result = db.delete_key(None, "~trash", DeleteOptions::default());
        assert!(matches!(result, Err(QuicksaveError::ReservedKey { .. })));
    }

    #[test]
    fn test_missing_working_file() {
        let work = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let mut db = open_db(&db_dir);

        let result = db.register(&work.path().join("ghost.txt"), RegisterOptions::default());
        assert!(matches!(result, Err(QuicksaveError::MissingFile { .. })));
        assert!(db.catalog().files.is_empty());
    }

    #[test]
    fn test_clean_without_passes() {
        let db_dir = TempDir::new().unwrap();
        let mut db = open_db(&db_dir);
        assert!(matches!(
            db.clean(CleanOptions::default()),
            Err(QuicksaveError::NoCleanOperationSelected)
        ));
    }

    #[test]
    fn test_recover_with_empty_trash() {
        let db_dir = TempDir::new().unwrap();
        let mut db = open_db(&db_dir);
        assert!(matches!(db.recover(&[]), Err(QuicksaveError::NothingToRecover)));
    }
}
