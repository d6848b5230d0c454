use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use backupd_core::Configuration;
use backupd_sync::{CycleOutcome, SyncEngine, SyncError, WarningKind};
use filetime::FileTime;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(dest: &Path, items: Vec<PathBuf>) -> Configuration {
    Configuration {
        interval: 2,
        backup_destination: dest.to_path_buf(),
        items_to_backup: items,
    }
}

/// Build `<root>/src` with a file item and a directory item.
fn seed_sources(root: &Path) -> (PathBuf, PathBuf) {
    let src = root.join("src");
    fs::create_dir_all(src.join("project/notes")).expect("create project");
    fs::write(src.join("a.txt"), "alpha").expect("write a.txt");
    fs::write(src.join("project/readme.md"), "# project").expect("write readme");
    fs::write(src.join("project/notes/todo.txt"), "ship it").expect("write todo");
    (src.join("a.txt"), src.join("project"))
}

// ---------------------------------------------------------------------------
// 1. Backup cycle
// ---------------------------------------------------------------------------

#[test]
fn items_land_under_their_base_names() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (file, dir) = seed_sources(root.path());
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());

    let report = engine
        .backup(&config(&dest, vec![file, dir]))
        .expect("backup");

    assert_eq!(report.outcome(), CycleOutcome::Success);
    assert_eq!(report.items_copied, 2);
    assert_eq!(report.stats.files, 3);
    assert_eq!(fs::read_to_string(dest.join("a.txt")).expect("a.txt"), "alpha");
    assert_eq!(
        fs::read_to_string(dest.join("project/notes/todo.txt")).expect("todo"),
        "ship it"
    );
}

#[test]
fn deleted_source_keeps_stale_copy_and_warns() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (file, _) = seed_sources(root.path());
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());
    let cfg = config(&dest, vec![file.clone()]);

    engine.backup(&cfg).expect("first cycle");
    assert_eq!(fs::read_to_string(dest.join("a.txt")).expect("copy"), "alpha");

    fs::remove_file(&file).expect("delete source");
    let report = engine.backup(&cfg).expect("second cycle is not a failure");

    assert_eq!(report.outcome(), CycleOutcome::Partial);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, WarningKind::SourceMissing);
    assert_eq!(report.warnings[0].path, file);
    assert_eq!(fs::read_to_string(dest.join("a.txt")).expect("stale copy"), "alpha");
}

#[test]
fn repeated_cycles_are_idempotent() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (file, dir) = seed_sources(root.path());
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());
    let cfg = config(&dest, vec![file, dir]);

    engine.backup(&cfg).expect("first");
    let first = snapshot(&dest);
    engine.backup(&cfg).expect("second");
    assert_eq!(snapshot(&dest), first);
}

#[test]
fn missing_item_does_not_block_the_others() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (file, dir) = seed_sources(root.path());
    let ghost = root.path().join("src/ghost");
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());

    let report = engine
        .backup(&config(&dest, vec![ghost, file, dir]))
        .expect("backup");

    assert_eq!(report.items_copied, 2);
    assert_eq!(report.warnings.len(), 1);
    assert!(dest.join("a.txt").is_file());
    assert!(dest.join("project").is_dir());
}

#[test]
fn nested_items_are_copied_once() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (_, dir) = seed_sources(root.path());
    let notes = dir.join("notes");
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());

    let report = engine
        .backup(&config(&dest, vec![dir, notes.clone()]))
        .expect("backup");

    assert_eq!(report.nested, vec![notes]);
    assert!(dest.join("project/notes/todo.txt").is_file());
    assert!(!dest.join("notes").exists());
}

#[test]
fn cycle_in_one_item_is_a_warning() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (file, dir) = seed_sources(root.path());
    std::os::unix::fs::symlink(&dir, dir.join("notes/back")).expect("symlink");
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());

    let report = engine
        .backup(&config(&dest, vec![dir, file]))
        .expect("cycle does not abort the cycle");

    assert_eq!(report.items_copied, 1);
    assert_eq!(report.warnings[0].kind, WarningKind::CopyCycle);
    assert!(dest.join("a.txt").is_file());
}

/// Strip every permission bit from `path`; false when this user can read it
/// regardless (root) and the test has nothing to observe.
fn lock_out(path: &Path) -> bool {
    fs::set_permissions(path, fs::Permissions::from_mode(0o000)).expect("chmod 000");
    let readable = if path.is_dir() {
        fs::read_dir(path).is_ok()
    } else {
        fs::File::open(path).is_ok()
    };
    if readable {
        eprintln!("permission bits not enforced for this user, skipping");
    }
    !readable
}

#[test]
fn unreadable_items_are_source_unreadable_warnings() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (file, dir) = seed_sources(root.path());
    let secret = root.path().join("src/secret.txt");
    fs::write(&secret, "secret").expect("write secret");
    let locked = root.path().join("src/locked");
    fs::create_dir_all(&locked).expect("create locked");
    fs::write(locked.join("inner.txt"), "inner").expect("write inner");
    if !lock_out(&secret) || !lock_out(&locked) {
        return;
    }
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());

    let report = engine
        .backup(&config(&dest, vec![secret.clone(), locked.clone(), file, dir]))
        .expect("unreadable sources do not abort the cycle");
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).expect("restore secret");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("restore locked");

    assert_eq!(report.outcome(), CycleOutcome::Partial);
    assert_eq!(report.items_copied, 2);
    let kinds: Vec<_> = report.warnings.iter().map(|w| (w.path.clone(), w.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (secret, WarningKind::SourceUnreadable),
            (locked, WarningKind::SourceUnreadable),
        ]
    );
    assert!(!dest.join("secret.txt").exists());
    assert!(!dest.join("locked").exists());
    assert!(dest.join("a.txt").is_file());
}

#[test]
fn backup_preserves_mtime() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (file, _) = seed_sources(root.path());
    let stamp = FileTime::from_unix_time(1_500_000_000, 0);
    filetime::set_file_mtime(&file, stamp).expect("set mtime");
    let dest = root.path().join("d");

    SyncEngine::at(root.path())
        .backup(&config(&dest, vec![file]))
        .expect("backup");

    let meta = fs::metadata(dest.join("a.txt")).expect("copy meta");
    assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
}

// ---------------------------------------------------------------------------
// 2. Restore
// ---------------------------------------------------------------------------

#[test]
fn restore_reproduces_backed_up_tree() {
    init_logging();
    let root = TempDir::new().expect("root");
    let (file, dir) = seed_sources(root.path());
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());
    let cfg = config(&dest, vec![file, dir]);
    engine.backup(&cfg).expect("backup");

    let target = root.path().join("restored");
    fs::create_dir_all(&target).expect("target");
    fs::write(target.join("keep.txt"), "untouched").expect("existing file");
    fs::write(target.join("a.txt"), "old").expect("same-named file");

    let report = engine.restore(&cfg, &target).expect("restore");

    assert_eq!(report.entries, 2);
    assert_eq!(fs::read_to_string(target.join("a.txt")).expect("a"), "alpha");
    assert_eq!(fs::read_to_string(target.join("keep.txt")).expect("keep"), "untouched");
    assert_eq!(
        fs::read_to_string(target.join("project/readme.md")).expect("readme"),
        "# project"
    );
}

#[test]
fn restore_from_empty_or_missing_destination_fails() {
    init_logging();
    let root = TempDir::new().expect("root");
    let dest = root.path().join("d");
    let engine = SyncEngine::at(root.path());
    let cfg = config(&dest, Vec::new());
    let target = root.path().join("restored");

    let err = engine.restore(&cfg, &target).unwrap_err();
    assert!(matches!(err, SyncError::DestinationEmpty { .. }));
    assert_eq!(err.exit_code(), 31);

    fs::create_dir_all(&dest).expect("empty dest");
    let err = engine.restore(&cfg, &target).unwrap_err();
    assert!(matches!(err, SyncError::DestinationEmpty { .. }));
    assert!(!target.exists(), "nothing created on failure");
}

fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).expect("read dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let bytes = fs::read(&path).expect("read file");
                out.push((path.strip_prefix(root).expect("prefix").to_path_buf(), bytes));
            }
        }
    }
    out.sort();
    out
}
