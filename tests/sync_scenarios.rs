//! End-to-end sync scenarios (spec §8), driven through the public
//! [`gitdocdb::Database`] API over two [`InMemoryRepo`]s linked to a shared
//! remote.
//!
//! "Remote provisioning" (getting the very first commit onto a previously
//! nonexistent remote branch) is an external collaborator (spec §1); these
//! tests simulate it by calling [`GitRepo::push_branch`] directly rather
//! than through [`gitdocdb::Database::sync`], which always fetches first.

use std::sync::Arc;

use gitdocdb::config::{CombineDbStrategy, StrategyTag, SyncDirection};
use gitdocdb::task_queue::TaskKind;
use gitdocdb::{ConflictOperation, Database, OpenOptions, SyncOptions, SyncResult};
use gitdocdb_git::testing::InMemoryRepo;
use gitdocdb_git::{GitRepo, RefName};
use serde_json::json;

const REMOTE_URL: &str = "https://example.com/remote.git";

fn sync_options(remote_url: &str) -> SyncOptions {
    SyncOptions {
        remote_url: remote_url.to_owned(),
        access_token: None,
        sync_direction: SyncDirection::Both,
        live: false,
        interval_ms: None,
        retry: 3,
        retry_interval_ms: 2_500,
        conflict_resolution_strategy: StrategyTag::OursProp,
        combine_db_strategy: CombineDbStrategy::CombineHeadWithTheirs,
        include_commits: false,
    }
}

fn open(repo: &Arc<InMemoryRepo>, db_name: &str) -> Database {
    let dyn_repo: Arc<dyn GitRepo> = Arc::clone(repo) as Arc<dyn GitRepo>;
    Database::open(dyn_repo, OpenOptions::new(db_name, format!("/tmp/{db_name}")).unwrap()).unwrap()
}

/// Provision `remote` with `repo`'s current local tip, as though some
/// out-of-scope remote-provisioning step had already run.
fn provision(repo: &Arc<InMemoryRepo>, remote: &Arc<InMemoryRepo>) {
    repo.set_remote(Arc::clone(remote));
    repo.push_branch(REMOTE_URL, "refs/heads/main", "refs/heads/main", None).unwrap();
}

fn main_tip(repo: &InMemoryRepo) -> gitdocdb_git::GitOid {
    let main = RefName::new("refs/heads/main").unwrap();
    repo.rev_parse(main.as_str()).unwrap()
}

fn doc_value(repo: &InMemoryRepo, storage_name: &str) -> serde_json::Value {
    let commit = main_tip(repo);
    let tree = repo.read_commit(commit).unwrap().tree_oid;
    let entry = repo
        .read_tree(tree)
        .unwrap()
        .into_iter()
        .find(|e| e.name == storage_name)
        .unwrap_or_else(|| panic!("no such path {storage_name}"));
    serde_json::from_slice(&repo.read_blob(entry.oid).unwrap()).unwrap()
}

fn tree_names(repo: &InMemoryRepo) -> Vec<String> {
    let commit = main_tip(repo);
    let tree = repo.read_commit(commit).unwrap().tree_oid;
    repo.read_tree(tree).unwrap().into_iter().map(|e| e.name).collect()
}

#[tokio::test]
async fn scenario_a_classify_case_insert_insert_conflict_ours() {
    let remote = Arc::new(InMemoryRepo::new());

    // A and B share a db_name, so Database::open produces an identical
    // identity commit on both sides: their real common ancestor.
    let repo_a = Arc::new(InMemoryRepo::new());
    let db_a = open(&repo_a, "shared-db");
    db_a.put("1", json!({"name": "fromA"})).await.unwrap();
    db_a.put("2", json!({"name": "fromA"})).await.unwrap();
    provision(&repo_a, &remote);

    let repo_b = Arc::new(InMemoryRepo::new());
    let db_b = open(&repo_b, "shared-db");
    db_b.put("1", json!({"name": "fromB"})).await.unwrap();
    db_b.put("3", json!({"name": "fromB"})).await.unwrap();
    repo_b.set_remote(Arc::clone(&remote));

    let mut options = sync_options(REMOTE_URL);
    options.conflict_resolution_strategy = StrategyTag::Ours;
    db_b.attach_sync(options).unwrap();
    let result = db_b.sync().await.unwrap();

    match result {
        SyncResult::ResolveConflictsAndPush { conflicts, .. } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].fat_doc.storage_name, "1.json");
            assert_eq!(conflicts[0].operation, ConflictOperation::Insert);
            assert_eq!(conflicts[0].strategy, StrategyTag::Ours);
        }
        other => panic!("expected ResolveConflictsAndPush, got {other:?}"),
    }

    let names = tree_names(&repo_b);
    assert!(names.contains(&"1.json".to_owned()));
    assert!(names.contains(&"2.json".to_owned()));
    assert!(names.contains(&"3.json".to_owned()));
    assert_eq!(doc_value(&repo_b, "1.json")["name"], "fromB");
    assert_eq!(doc_value(&repo_b, "2.json")["name"], "fromA");
    assert_eq!(doc_value(&repo_b, "3.json")["name"], "fromB");

    // Path 1 and the new path 3 reached the remote; path 2 reached local.
    let remote_names = tree_names(&remote);
    assert!(remote_names.contains(&"1.json".to_owned()));
    assert!(remote_names.contains(&"2.json".to_owned()));
    assert!(remote_names.contains(&"3.json".to_owned()));
}

#[tokio::test]
async fn scenario_b_classify_case_update_update_conflict_ours_prop() {
    let remote = Arc::new(InMemoryRepo::new());

    let repo_a = Arc::new(InMemoryRepo::new());
    let db_a = open(&repo_a, "shared-db");
    db_a.put("1", json!({"name": "Hello, world!"})).await.unwrap();
    db_a.put("1", json!({"name": "Hello"})).await.unwrap();
    provision(&repo_a, &remote);

    let repo_b = Arc::new(InMemoryRepo::new());
    let db_b = open(&repo_b, "shared-db");
    db_b.put("1", json!({"name": "Hello, world!"})).await.unwrap();
    db_b.put("1", json!({"name": "Hello, world! Hello, Nara!"})).await.unwrap();
    repo_b.set_remote(Arc::clone(&remote));

    db_b.attach_sync(sync_options(REMOTE_URL)).unwrap();
    let result = db_b.sync().await.unwrap();

    // Both sides edit the whole `name` value, so the OT property merge
    // collides at that single path; the splice step then decomposes each
    // side's edit against the shared base string and, finding the two
    // edited regions disjoint (B appended a sentence, A deleted one),
    // merges both into one string rather than letting either bias pick a
    // side outright (spec §8 scenario B).
    match result {
        SyncResult::ResolveConflictsAndPush { conflicts, .. } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].fat_doc.storage_name, "1.json");
            assert_eq!(conflicts[0].operation, ConflictOperation::UpdateMerge);
            assert_eq!(conflicts[0].strategy, StrategyTag::OursProp);
        }
        other => panic!("expected ResolveConflictsAndPush, got {other:?}"),
    }

    assert_eq!(doc_value(&repo_b, "1.json")["name"], "Hello Hello, Nara!");
}

#[tokio::test]
async fn scenario_c_combine_unrelated_histories() {
    let remote = Arc::new(InMemoryRepo::new());

    // A's remote lineage: independent db_name so the identity commit (and
    // thus the whole history) shares no ancestor with B.
    let repo_a = Arc::new(InMemoryRepo::new());
    let db_a = open(&repo_a, "db-a");
    db_a.put("1", json!({"name": "fromA"})).await.unwrap();
    provision(&repo_a, &remote);

    let repo_b = Arc::new(InMemoryRepo::new());
    let db_b = open(&repo_b, "db-b");
    db_b.put("1", json!({"name": "fromB"})).await.unwrap();
    db_b.put("2", json!({"name": "fromB"})).await.unwrap();
    repo_b.set_remote(Arc::clone(&remote));

    db_b.attach_sync(sync_options(REMOTE_URL)).unwrap();
    let result = db_b.sync().await.unwrap();

    match result {
        SyncResult::CombineDatabase { duplicates, .. } => {
            assert_eq!(duplicates.len(), 1);
            assert_eq!(duplicates[0].original.storage_name, "1.json");
            assert_eq!(duplicates[0].duplicate.storage_name, "1-from-db-b.json");
        }
        other => panic!("expected CombineDatabase, got {other:?}"),
    }

    let names = tree_names(&repo_b);
    assert!(names.contains(&"1.json".to_owned()), "remote's 1.json wins at the original path");
    assert!(names.contains(&"1-from-db-b.json".to_owned()), "B's colliding value survives renamed");
    assert!(names.contains(&"2.json".to_owned()));
    assert_eq!(doc_value(&repo_b, "1.json")["name"], "fromA");
    assert_eq!(doc_value(&repo_b, "1-from-db-b.json")["name"], "fromB");
}

#[tokio::test]
async fn scenario_d_coalesced_sync() {
    let remote = Arc::new(InMemoryRepo::new());
    let repo_b = Arc::new(InMemoryRepo::new());
    let db_b = open(&repo_b, "shared-db");
    // Remote already equals local: every sync attempt resolves to `Nop`
    // quickly, so what's actually being exercised is the task queue's
    // coalescing of back-to-back `sync` tasks (spec §4.6), not the merge
    // logic.
    provision(&repo_b, &remote);

    db_b.attach_sync(sync_options(REMOTE_URL)).unwrap();
    let db_b = Arc::new(db_b);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let db = Arc::clone(&db_b);
        handles.push(tokio::spawn(async move { db.sync().await }));
    }

    let mut completed_non_canceled = 0;
    let mut canceled = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            SyncResult::Canceled => canceled += 1,
            _ => completed_non_canceled += 1,
        }
    }

    assert!(completed_non_canceled >= 1, "at least one sync should complete");
    assert!(canceled >= 6, "at least six of ten coalesced syncs should be canceled, got {canceled}");

    let stats = db_b.stats();
    assert!(stats.count(TaskKind::Sync) >= 1);
    assert!(stats.cancel_count() >= 6);
}

#[tokio::test]
async fn scenario_f_fast_forward() {
    let remote = Arc::new(InMemoryRepo::new());

    let repo_a = Arc::new(InMemoryRepo::new());
    let db_a = open(&repo_a, "shared-db");
    db_a.put("1", json!({"name": "fromA"})).await.unwrap();
    db_a.put("2", json!({"name": "fromA"})).await.unwrap();
    provision(&repo_a, &remote);

    // B opens the same identity (same db_name) but never writes a document:
    // its local history is a pure ancestor of A's pushed history.
    let repo_b = Arc::new(InMemoryRepo::new());
    let db_b = open(&repo_b, "shared-db");
    repo_b.set_remote(Arc::clone(&remote));

    db_b.attach_sync(sync_options(REMOTE_URL)).unwrap();
    let result = db_b.sync().await.unwrap();

    match result {
        SyncResult::FastForwardMerge { remote_changes, commits } => {
            assert_eq!(remote_changes.len(), 2);
            assert_eq!(commits.len(), 1);
        }
        other => panic!("expected FastForwardMerge, got {other:?}"),
    }

    assert_eq!(main_tip(&repo_b), main_tip(&repo_a));
    assert_eq!(doc_value(&repo_b, "1.json")["name"], "fromA");
    assert_eq!(doc_value(&repo_b, "2.json")["name"], "fromA");
}
