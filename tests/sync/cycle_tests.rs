// Full cycles over in-memory replica pairs.

use chrono::Duration;
use filesync::sync::{
    hash_bytes, ExcludePatterns, SyncOptions, TieBreak, REGISTRY_KEY,
};

use crate::common::{t, Pair};

#[tokio::test]
async fn test_create_edit_delete_lifecycle() {
    let pair = Pair::new();

    // Cycle 1: new local file is uploaded
    pair.local.put("a.txt", b"v1", t(100));
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(pair.remote.content("a.txt").unwrap(), b"v1");
    let registry = pair.syncer.load_registry().await.unwrap();
    let record = registry.get("a.txt").unwrap();
    assert_eq!(record.local.hash, hash_bytes(b"v1"));
    assert_eq!(record.remote.hash, hash_bytes(b"v1"));

    // Cycle 2: local edit is uploaded over the old copy
    pair.local.put("a.txt", b"v2", t(200));
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(report.applied(), 1);
    assert_eq!(pair.remote.content("a.txt").unwrap(), b"v2");
    let registry = pair.syncer.load_registry().await.unwrap();
    assert_eq!(registry.get("a.txt").unwrap().remote.hash, hash_bytes(b"v2"));

    // Cycle 3: local delete propagates, both sides tombstoned
    pair.local.remove("a.txt");
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.deleted_remote, 1);
    assert!(pair.remote.content("a.txt").is_none());
    let registry = pair.syncer.load_registry().await.unwrap();
    assert!(registry.get("a.txt").unwrap().is_fully_deleted());

    // Cycle 4: the record is pruned
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.prunes, 1);
    let registry = pair.syncer.load_registry().await.unwrap();
    assert!(registry.is_empty());

    assert!(pair.syncer.run_cycle().await.unwrap().is_idle());
}

#[tokio::test]
async fn test_second_cycle_is_idle() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"local", t(10));
    pair.local.put("dir/b.txt", b"nested", t(10));
    pair.remote.put("c.txt", b"remote", t(10));

    let first = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(first.uploads, 2);
    assert_eq!(first.downloads, 1);

    let reads_before = pair.local.reads() + pair.remote.reads();
    let second = pair.syncer.run_cycle().await.unwrap();
    assert!(second.is_idle(), "unexpected work: {}", second);
    // Only the registry itself was read
    assert_eq!(pair.local.reads() + pair.remote.reads(), reads_before + 1);
}

#[tokio::test]
async fn test_transfer_settles_each_replica_at_its_own_mod_time() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"v1", t(10));
    pair.syncer.run_cycle().await.unwrap();

    pair.local.put("a.txt", b"v2", t(50));
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(report.bytes_transferred, 2);

    let registry = pair.syncer.load_registry().await.unwrap();
    let record = registry.get("a.txt").unwrap();
    assert_eq!(record.local.hash, record.remote.hash);
    assert_eq!(record.local.hash, hash_bytes(b"v2"));

    // Each side's recorded state is what that replica reports, not the
    // source's: the destination was stamped by its own clock.
    let local_modified = pair.local.modified("a.txt").unwrap();
    let remote_modified = pair.remote.modified("a.txt").unwrap();
    assert_ne!(local_modified, remote_modified);
    assert_eq!(record.local.mod_time, local_modified);
    assert_eq!(record.remote.mod_time, remote_modified);
    assert_eq!((record.local.size, record.remote.size), (Some(2), Some(2)));

    // So the next cycle trusts both sides without hashing either
    let reads_before = pair.local.reads() + pair.remote.reads();
    assert!(pair.syncer.run_cycle().await.unwrap().is_idle());
    assert_eq!(pair.local.reads() + pair.remote.reads(), reads_before + 1);
}

#[tokio::test]
async fn test_edit_within_the_same_second_is_uploaded() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"version-one", t(100));
    pair.syncer.run_cycle().await.unwrap();

    pair.local.put("a.txt", b"version-two", t(100) + Duration::milliseconds(500));
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(pair.remote.content("a.txt").unwrap(), b"version-two");

    assert!(pair.syncer.run_cycle().await.unwrap().is_idle());
}

#[tokio::test]
async fn test_edit_within_the_same_second_survives_remote_delete() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"version-one", t(100));
    pair.syncer.run_cycle().await.unwrap();

    pair.remote.remove("a.txt");
    pair.local.put("a.txt", b"version-two", t(100) + Duration::milliseconds(700));
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.deleted_local, 0);
    assert_eq!(report.uploads, 1);
    assert_eq!(pair.local.content("a.txt").unwrap(), b"version-two");
    assert_eq!(pair.remote.content("a.txt").unwrap(), b"version-two");
}

#[tokio::test]
async fn test_report_fingerprint_reflects_remote_after_execution() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"a", t(10));
    pair.local.put("b.txt", b"bb", t(10));

    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 2);
    let current = pair.syncer.remote_fingerprint().await.unwrap();
    assert_eq!(report.remote_fingerprint, current);
    assert_eq!(current.count, 2);
    assert_eq!(current.total_size, 3);

    pair.local.remove("a.txt");
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.deleted_remote, 1);
    assert_eq!(report.remote_fingerprint, pair.syncer.remote_fingerprint().await.unwrap());
}

#[tokio::test]
async fn test_remote_delete_reaches_local() {
    let pair = Pair::new();
    pair.remote.put("docs/a.txt", b"v1", t(10));
    pair.syncer.run_cycle().await.unwrap();
    assert!(pair.local.content("docs/a.txt").is_some());

    pair.remote.remove("docs/a.txt");
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.deleted_local, 1);
    assert!(pair.local.keys().is_empty());

    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.prunes, 1);
}

#[tokio::test]
async fn test_touch_is_not_transferred() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"v1", t(10));
    pair.syncer.run_cycle().await.unwrap();

    pair.local.touch("a.txt", t(600));
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.noops, 1);
    assert_eq!(report.uploads, 0);

    assert!(pair.syncer.run_cycle().await.unwrap().is_idle());
}

#[tokio::test]
async fn test_conflicting_first_sync_uses_tie_break() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"from local", t(10));
    pair.remote.put("a.txt", b"from remote", t(10));
    pair.syncer.run_cycle().await.unwrap();
    assert_eq!(pair.remote.content("a.txt").unwrap(), b"from local");

    let pair = Pair::with_tie_break(TieBreak::Remote);
    pair.local.put("a.txt", b"from local", t(10));
    pair.remote.put("a.txt", b"from remote", t(10));
    pair.syncer.run_cycle().await.unwrap();
    assert_eq!(pair.local.content("a.txt").unwrap(), b"from remote");
}

#[tokio::test]
async fn test_failed_write_is_retried_next_cycle() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"a", t(10));
    pair.local.put("b.txt", b"b", t(10));
    pair.remote.fail_writes_to("a.txt");

    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(report.failures, 1);
    let registry = pair.syncer.load_registry().await.unwrap();
    assert!(registry.get("a.txt").is_none());
    assert!(registry.get("b.txt").is_some());

    pair.remote.heal();
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(pair.remote.content("a.txt").unwrap(), b"a");
}

#[tokio::test]
async fn test_failed_delete_keeps_record() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"a", t(10));
    pair.syncer.run_cycle().await.unwrap();
    let before = pair.syncer.load_registry().await.unwrap();

    pair.local.remove("a.txt");
    pair.remote.fail_deletes_of("a.txt");
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(
        pair.syncer.load_registry().await.unwrap().get("a.txt"),
        before.get("a.txt")
    );

    pair.remote.heal();
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.deleted_remote, 1);
}

#[tokio::test]
async fn test_listing_failure_aborts_without_changes() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"a", t(10));
    pair.remote.fail_list(true);

    assert!(pair.syncer.run_cycle().await.is_err());
    assert!(pair.remote.keys().is_empty());
    assert_eq!(pair.local.keys(), vec!["a.txt".to_string()]);
}

#[tokio::test]
async fn test_corrupt_registry_never_deletes() {
    let pair = Pair::new();
    pair.local.put("same.txt", b"s", t(10));
    pair.remote.put("same.txt", b"s", t(20));
    pair.local.put("local-only.txt", b"l", t(10));
    pair.remote.put(REGISTRY_KEY, b"{not json", t(5));

    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.noops, 1);
    assert_eq!(report.uploads, 1);
    assert_eq!(report.deleted_local + report.deleted_remote, 0);

    // Rewritten as a valid registry
    let registry = pair.syncer.load_registry().await.unwrap();
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_registry_stays_on_remote() {
    let pair = Pair::new();
    pair.remote.put("a.txt", b"a", t(10));
    pair.syncer.run_cycle().await.unwrap();
    pair.syncer.run_cycle().await.unwrap();

    assert!(pair.remote.content(REGISTRY_KEY).is_some());
    assert_eq!(pair.local.keys(), vec!["a.txt".to_string()]);
}

#[tokio::test]
async fn test_excluded_files_are_left_alone() {
    let pair = Pair::with_options(SyncOptions {
        excludes: ExcludePatterns::build(&["*.log", "build/"], true).unwrap(),
        ..Default::default()
    });
    pair.local.put("keep.txt", b"k", t(10));
    pair.local.put("debug.log", b"d", t(10));
    pair.local.put("build/out.bin", b"o", t(10));
    pair.local.put("draft.swp", b"s", t(10));
    pair.local.put(".git/HEAD", b"h", t(10));

    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(pair.remote.keys(), vec![REGISTRY_KEY.to_string(), "keep.txt".to_string()]);
}

#[tokio::test]
async fn test_verify_after_transfer() {
    let pair = Pair::with_options(SyncOptions {
        verify: true,
        ..Default::default()
    });
    pair.local.put("a.txt", b"verified content", t(10));
    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 1);
    assert_eq!(report.failures, 0);
}

#[tokio::test]
async fn test_plan_has_no_side_effects() {
    let pair = Pair::new();
    pair.local.put("a.txt", b"a", t(10));
    pair.remote.put("b.txt", b"b", t(10));

    let plan = pair.syncer.plan().await.unwrap();
    let labels: Vec<_> = plan.actions.iter().map(|a| a.label()).collect();
    assert_eq!(labels, vec!["upload", "download"]);

    assert_eq!(pair.local.keys(), vec!["a.txt".to_string()]);
    assert_eq!(pair.remote.keys(), vec!["b.txt".to_string()]);
}

#[tokio::test]
async fn test_many_transfers_with_limited_concurrency() {
    let pair = Pair::with_options(SyncOptions {
        transfer_concurrency: 2,
        ..Default::default()
    });
    for i in 0..20 {
        pair.local.put(&format!("file-{:02}.txt", i), format!("content {}", i).as_bytes(), t(10));
    }

    let report = pair.syncer.run_cycle().await.unwrap();
    assert_eq!(report.uploads, 20);
    assert_eq!(pair.syncer.load_registry().await.unwrap().len(), 20);
    assert!(pair.syncer.run_cycle().await.unwrap().is_idle());
}
