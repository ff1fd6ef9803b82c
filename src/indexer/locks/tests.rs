use super::*;
use std::time::Duration;

#[test]
fn same_project_shares_a_lock() {
    let locks = ProjectLocks::default();

    let first = locks.lock_for("alpha");
    let second = locks.lock_for("alpha");
    let other = locks.lock_for("beta");

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(locks.tracked_projects(), 2);
}

#[test]
fn clones_share_the_registry() {
    let locks = ProjectLocks::default();
    let clone = locks.clone();

    assert!(Arc::ptr_eq(&locks.lock_for("alpha"), &clone.lock_for("alpha")));
}

#[tokio::test]
async fn writer_excludes_readers_of_the_same_project() {
    let locks = ProjectLocks::default();
    let lock = locks.lock_for("alpha");

    let write_guard = lock.write().await;
    let blocked = tokio::time::timeout(Duration::from_millis(50), lock.read()).await;
    assert!(blocked.is_err(), "read should wait for the writer");

    let unrelated = locks.lock_for("beta");
    let free = tokio::time::timeout(Duration::from_millis(50), unrelated.read()).await;
    assert!(free.is_ok(), "other projects are not blocked");

    drop(write_guard);
    let read_guard = lock.read().await;
    let second_reader = tokio::time::timeout(Duration::from_millis(50), lock.read()).await;
    assert!(second_reader.is_ok(), "readers share the lock");
    drop(read_guard);
}

#[test]
fn evict_skips_locks_still_in_use() {
    let locks = ProjectLocks::default();
    let held = locks.lock_for("alpha");
    drop(locks.lock_for("beta"));

    assert!(!locks.evict("alpha"), "alpha is still held");
    assert!(locks.evict("beta"));
    assert!(!locks.evict("missing"));
    assert_eq!(locks.tracked_projects(), 1);

    drop(held);
    assert!(locks.evict("alpha"));
    assert_eq!(locks.tracked_projects(), 0);
}

#[tokio::test]
async fn file_lock_excludes_other_holders() {
    let temp_dir = tempfile::TempDir::new().expect("should create temp dir");
    let index_dir = temp_dir.path().join("indexes");

    let none = ProjectFileLock::shared(&index_dir, "alpha")
        .await
        .expect("missing lock file is not an error");
    assert!(none.is_none());

    let held = ProjectFileLock::exclusive(&index_dir, "alpha")
        .await
        .expect("should lock");
    assert!(lock_file_path(&index_dir, "alpha").exists());

    let second = tokio::time::timeout(
        Duration::from_millis(100),
        ProjectFileLock::exclusive(&index_dir, "alpha"),
    )
    .await;
    assert!(second.is_err(), "second writer should wait");

    let reader = tokio::time::timeout(
        Duration::from_millis(100),
        ProjectFileLock::shared(&index_dir, "alpha"),
    )
    .await;
    assert!(reader.is_err(), "reader should wait for the writer");

    let other = ProjectFileLock::exclusive(&index_dir, "beta")
        .await
        .expect("other projects are not blocked");
    drop(other);

    drop(held);
    let first_reader = ProjectFileLock::shared(&index_dir, "alpha")
        .await
        .expect("should lock")
        .expect("lock file exists");
    let second_reader = ProjectFileLock::shared(&index_dir, "alpha")
        .await
        .expect("readers share the lock");
    assert!(second_reader.is_some());
    drop(first_reader);
}
