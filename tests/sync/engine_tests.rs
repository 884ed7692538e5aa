// Planning decisions of the reconciliation engine, checked against
// hand-built registries.

use filesync::sync::{
    hash_bytes, ActionKind, Direction, EngineOptions, Lister, Plan, Reconciler, Registry,
    SyncRecord, TieBreak,
};

use crate::common::{t, MemReplica};

async fn plan_with(
    local: &MemReplica,
    remote: &MemReplica,
    registry: &Registry,
    options: EngineOptions,
) -> Plan {
    let lister = Lister::default();
    let local_listing = lister.list(local).await.unwrap();
    let remote_listing = lister.list(remote).await.unwrap();
    Reconciler::new(local, remote, options)
        .plan(&local_listing, &remote_listing, registry)
        .await
}

async fn plan(local: &MemReplica, remote: &MemReplica, registry: &Registry) -> Plan {
    plan_with(local, remote, registry, EngineOptions::default()).await
}

fn synced(registry: &mut Registry, key: &str, content: &[u8], local_secs: i64, remote_secs: i64) {
    registry.insert(
        key,
        SyncRecord::synced(&hash_bytes(content), t(local_secs), t(remote_secs)),
    );
}

fn labels(plan: &Plan) -> Vec<(String, &'static str)> {
    plan.actions
        .iter()
        .map(|action| (action.key.clone(), action.label()))
        .collect()
}

#[tokio::test]
async fn test_new_files_transfer_away_from_their_side() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("only-local.txt", b"l", t(10));
    remote.put("only-remote.txt", b"r", t(10));

    let plan = plan(&local, &remote, &Registry::new()).await;
    assert_eq!(
        labels(&plan),
        vec![
            ("only-local.txt".to_string(), "upload"),
            ("only-remote.txt".to_string(), "download"),
        ]
    );
    // First-seen transfers do not read content while planning
    assert_eq!(local.reads() + remote.reads(), 0);
}

#[tokio::test]
async fn test_unchanged_synced_key_plans_nothing_and_reads_nothing() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"same", t(10));
    remote.put("a.txt", b"same", t(20));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"same", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert!(plan.is_empty());
    assert_eq!(local.reads() + remote.reads(), 0);
}

#[tokio::test]
async fn test_sub_second_touch_rehashes_but_keeps_content() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"same", t(10) + chrono::Duration::milliseconds(400));
    remote.put("a.txt", b"same", t(20));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"same", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "noop")]);
    assert_eq!(local.reads(), 1);
    assert_eq!(remote.reads(), 0);
}

#[tokio::test]
async fn test_sub_second_edit_uploads() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    // Saved twice within the same second: same size, different bytes
    local.put("a.txt", b"v2", t(10) + chrono::Duration::milliseconds(500));
    remote.put("a.txt", b"v1", t(20));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "upload")]);
}

#[tokio::test]
async fn test_sub_second_edit_beats_remote_delete() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"v2", t(10) + chrono::Duration::milliseconds(700));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "upload")]);
}

#[tokio::test]
async fn test_size_change_at_same_mod_time_rehashes() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"longer content", t(10));
    remote.put("a.txt", b"v1", t(20));
    let mut registry = Registry::new();
    registry.insert(
        "a.txt",
        SyncRecord::synced(&hash_bytes(b"v1"), t(10), t(20)).with_sizes(2, 2),
    );

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "upload")]);
    assert_eq!(local.reads(), 1);
}

#[tokio::test]
async fn test_touch_without_edit_is_noop_refresh() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"same", t(500));
    remote.put("a.txt", b"same", t(20));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"same", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(plan.actions.len(), 1);
    match &plan.actions[0].kind {
        ActionKind::NoOp { record } => {
            assert_eq!(record.local.mod_time, t(500));
            assert_eq!(record.remote.mod_time, t(20));
            assert_eq!(record.local.hash, hash_bytes(b"same"));
            assert_eq!(record.local.size, Some(4));
        }
        other => panic!("expected noop, got {:?}", other),
    }
    // Only the touched side was hashed
    assert_eq!(local.reads(), 1);
    assert_eq!(remote.reads(), 0);
}

#[tokio::test]
async fn test_identical_content_without_record_is_adopted() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"same", t(10));
    remote.put("a.txt", b"same", t(99));

    let plan = plan(&local, &remote, &Registry::new()).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "noop")]);
}

#[tokio::test]
async fn test_local_edit_uploads() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"v2", t(200));
    remote.put("a.txt", b"v1", t(20));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 100, 20);

    let plan = plan(&local, &remote, &registry).await;
    match &plan.actions[0].kind {
        ActionKind::Transfer {
            direction, hash, ..
        } => {
            assert_eq!(*direction, Direction::Upload);
            assert_eq!(hash.as_deref(), Some(hash_bytes(b"v2").as_str()));
        }
        other => panic!("expected transfer, got {:?}", other),
    }
}

#[tokio::test]
async fn test_only_changed_side_wins_over_newer_mod_time() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    // Local was re-touched later but not edited; remote really changed
    local.put("a.txt", b"v1", t(900));
    remote.put("a.txt", b"remote edit", t(300));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 100, 100);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "download")]);
}

#[tokio::test]
async fn test_both_edited_newer_wins() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"local edit", t(300));
    remote.put("a.txt", b"remote edit", t(400));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 100, 100);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "download")]);
}

#[tokio::test]
async fn test_tie_break_is_deterministic() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"local edit", t(300));
    remote.put("a.txt", b"remote edit", t(300));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 100, 100);

    for _ in 0..3 {
        let plan = plan(&local, &remote, &registry).await;
        assert_eq!(labels(&plan), vec![("a.txt".to_string(), "upload")]);
    }

    let remote_wins = EngineOptions {
        tie_break: TieBreak::Remote,
        ..Default::default()
    };
    let plan = plan_with(&local, &remote, &registry, remote_wins).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "download")]);
}

#[tokio::test]
async fn test_local_delete_propagates_to_remote() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    remote.put("a.txt", b"v1", t(20));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "delete-remote")]);
    assert_eq!(plan.actions[0].prior, registry.get("a.txt").cloned());
}

#[tokio::test]
async fn test_remote_delete_propagates_to_local() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("dir/a.txt", b"v1", t(10));
    let mut registry = Registry::new();
    synced(&mut registry, "dir/a.txt", b"v1", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("dir/a.txt".to_string(), "delete-local")]);
}

#[tokio::test]
async fn test_touched_survivor_still_deleted() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"v1", t(700));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "delete-local")]);
}

#[tokio::test]
async fn test_edit_beats_delete() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    remote.put("a.txt", b"edited after sync", t(500));
    let mut registry = Registry::new();
    synced(&mut registry, "a.txt", b"v1", 10, 20);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "download")]);
}

#[tokio::test]
async fn test_absent_everywhere_prunes() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    let mut registry = Registry::new();
    synced(&mut registry, "live-record.txt", b"v1", 10, 20);

    let mut gone = SyncRecord::synced(&hash_bytes(b"v1"), t(10), t(20));
    gone.local = gone.local.tombstoned(t(30));
    gone.remote = gone.remote.tombstoned(t(40));
    registry.insert("gone.txt", gone);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(
        labels(&plan),
        vec![
            ("gone.txt".to_string(), "prune"),
            ("live-record.txt".to_string(), "prune"),
        ]
    );
}

#[tokio::test]
async fn test_recreated_after_full_delete_is_uploaded() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("a.txt", b"v1", t(10));
    let mut record = SyncRecord::synced(&hash_bytes(b"v1"), t(10), t(20));
    record.local = record.local.tombstoned(t(30));
    record.remote = record.remote.tombstoned(t(30));
    let mut registry = Registry::new();
    registry.insert("a.txt", record);

    let plan = plan(&local, &remote, &registry).await;
    assert_eq!(labels(&plan), vec![("a.txt".to_string(), "upload")]);
}

#[tokio::test]
async fn test_hash_failure_is_isolated_to_its_key() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put("bad.txt", b"x", t(10));
    remote.put("bad.txt", b"y", t(10));
    local.put("good.txt", b"g", t(10));
    local.fail_reads_of("bad.txt");

    let plan = plan(&local, &remote, &Registry::new()).await;
    assert_eq!(labels(&plan), vec![("good.txt".to_string(), "upload")]);
    assert_eq!(plan.failures.len(), 1);
    assert_eq!(plan.failures[0].key, "bad.txt");
}

#[tokio::test]
async fn test_hidden_and_registry_keys_are_never_candidates() {
    let local = MemReplica::new();
    let remote = MemReplica::new();
    local.put(".hidden", b"x", t(10));
    local.put("dir/.cache/blob", b"x", t(10));
    remote.put(filesync::sync::REGISTRY_KEY, b"{}", t(10));

    let plan = plan(&local, &remote, &Registry::new()).await;
    assert!(plan.is_empty());
}
