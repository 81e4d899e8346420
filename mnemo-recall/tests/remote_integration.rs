//! End-to-end tests of sync, retrieval, and linked-doc resolution against a
//! mock note store.

mod common;

use std::sync::Arc;

use serde_json::json;

use mnemo_core::{IndexSettings, LinkedDocSettings, RecallSettings, SiyuanSettings};
use mnemo_db::{IndexDb, IndexStore};
use mnemo_recall::models::{Intent, IntentType};
use mnemo_recall::{
    LinkedDocResolver, RecallError, RetrievalEngine, SiyuanClient, SyncService,
};

use common::{MockDoc, MockState, spawn_mock};

fn client_for(base_url: &str) -> SiyuanClient {
    let mut settings = SiyuanSettings::default();
    settings.api_url = base_url.to_string();
    settings.api_token = "test-token".to_string();
    SiyuanClient::new(&settings)
}

fn work_doc(id: &str, title: &str, body: &str) -> MockDoc {
    MockDoc {
        id: id.to_string(),
        box_id: "nb1".to_string(),
        title: title.to_string(),
        hpath: format!("/Work/{title}"),
        updated: "20260801100000".to_string(),
        kramdown: body.to_string(),
    }
}

async fn setup(excluded: &[&str]) -> (Arc<MockState>, Arc<SiyuanClient>, Arc<IndexStore>, SyncService) {
    let state = Arc::new(MockState::default());
    *state.notebooks.lock().unwrap() = vec![
        ("nb1".to_string(), "Work".to_string()),
        ("nb2".to_string(), "Private".to_string()),
    ];

    let base_url = spawn_mock(Arc::clone(&state)).await;
    let client = Arc::new(client_for(&base_url));

    let db = IndexDb::in_memory().await.expect("open db");
    let store = Arc::new(IndexStore::new(
        db,
        excluded.iter().map(|s| s.to_string()),
    ));

    let sync = SyncService::new(
        Arc::clone(&client),
        Arc::clone(&store),
        IndexSettings::default(),
    );

    (state, client, store, sync)
}

#[tokio::test]
async fn initial_sync_mirrors_non_excluded_notebooks() {
    let (state, _client, store, sync) = setup(&["Private"]).await;
    {
        let mut docs = state.docs.lock().unwrap();
        docs.push(work_doc(
            "20260801100000-aaaaaaa",
            "rust notes",
            "# rust notes\nintro text\n## Ownership\nborrow checker rules\n{: id=\"x\"}",
        ));
        docs.push(MockDoc {
            id: "20260801100000-ppppppp".to_string(),
            box_id: "nb2".to_string(),
            title: "diary".to_string(),
            hpath: "/Private/diary".to_string(),
            updated: "20260801100000".to_string(),
            kramdown: "# diary\nsecret".to_string(),
        });
    }

    let report = sync.initial_sync().await.expect("initial sync");
    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_docs, 1);
    assert!(stats.last_sync.is_some());
    // Doc-level row plus the H2 section.
    assert_eq!(stats.total_blocks, 2);

    let hits = store.search("borrow", 10).await.unwrap();
    assert!(!hits.is_empty());
    // Kramdown attributes never reach the index.
    assert!(hits.iter().all(|hit| !hit.content.contains("{:")));

    assert!(store.search("secret", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn initial_sync_runs_once() {
    let (state, _client, _store, sync) = setup(&[]).await;
    state
        .docs
        .lock()
        .unwrap()
        .push(work_doc("20260801100000-aaaaaaa", "alpha", "# alpha\nbody"));

    sync.initial_sync().await.expect("first run");
    // The dispatcher must now pick incremental (no changed roots -> empty).
    let report = sync.sync_once().await.expect("second run");
    assert_eq!(report.synced, 0);
    assert_eq!(report.deleted, 0);
}

#[tokio::test]
async fn incremental_sync_detects_remote_deletion() {
    let (state, _client, store, sync) = setup(&[]).await;
    state
        .docs
        .lock()
        .unwrap()
        .push(work_doc("20260801100000-aaaaaaa", "doomed", "# doomed\ncontent"));

    sync.initial_sync().await.expect("initial");
    assert_eq!(store.search("doomed", 10).await.unwrap().len(), 1);

    state.docs.lock().unwrap().clear();
    *state.changed_roots.lock().unwrap() = vec!["20260801100000-aaaaaaa".to_string()];

    let report = sync.incremental_sync().await.expect("incremental");
    assert_eq!(report.deleted, 1);
    assert!(store.search("doomed", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn incremental_sync_isolates_per_doc_failures() {
    let (state, _client, store, sync) = setup(&[]).await;
    {
        let mut docs = state.docs.lock().unwrap();
        docs.push(work_doc(
            "20260801100000-aaaaaaa",
            "steady",
            "# steady\noriginal text",
        ));
        docs.push(work_doc(
            "20260801100000-bbbbbbb",
            "flaky",
            "# flaky\noriginal text",
        ));
    }
    sync.initial_sync().await.expect("initial");
    let stamp_before = store.last_sync_time().await.unwrap();

    state.docs.lock().unwrap()[0].kramdown = "# steady\nrevised text".to_string();
    *state.changed_roots.lock().unwrap() = vec![
        "20260801100000-aaaaaaa".to_string(),
        "20260801100000-bbbbbbb".to_string(),
    ];
    *state.fail_doc_lookups.lock().unwrap() = vec!["20260801100000-bbbbbbb".to_string()];

    // A transient failure on one doc's deletion check is counted, not fatal.
    let report = sync.incremental_sync().await.expect("batch survives");
    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(report.deleted, 0);

    // The healthy doc's changes landed and the stamp advanced.
    assert!(!store.search("revised", 10).await.unwrap().is_empty());
    assert_ne!(store.last_sync_time().await.unwrap(), stamp_before);
}

#[tokio::test]
async fn incremental_sync_reindexes_changed_documents() {
    let (state, _client, store, sync) = setup(&[]).await;
    state
        .docs
        .lock()
        .unwrap()
        .push(work_doc("20260801100000-aaaaaaa", "living", "# living\nfirst version"));

    sync.initial_sync().await.expect("initial");

    state.docs.lock().unwrap()[0].kramdown = "# living\nsecond edition".to_string();
    *state.changed_roots.lock().unwrap() = vec!["20260801100000-aaaaaaa".to_string()];

    let report = sync.incremental_sync().await.expect("incremental");
    assert_eq!(report.synced, 1);

    assert!(store.search("edition", 10).await.unwrap().len() > 0);
    assert!(store.search("version", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn two_stage_cap_bounds_fulltext_recall() {
    let (state, client, _store, _sync) = setup(&[]).await;
    {
        let mut blocks = state.fulltext_blocks.lock().unwrap();
        for doc in ["A", "B", "C"] {
            for i in 0..20 {
                blocks.push(json!({
                    "id": format!("{doc}-{i}"),
                    "rootID": doc,
                    "hPath": format!("/Work/doc{doc}"),
                    "content": format!("meeting agenda {doc} item {i}"),
                    "updated": "20260801100000",
                }));
            }
        }
    }

    let mut settings = RecallSettings::default();
    settings.search_paths = vec!["fulltext".to_string()];
    settings.two_stage.candidate_limit_per_path = 50;
    settings.two_stage.final_block_limit = 5;
    settings.two_stage.per_doc_block_cap = 2;

    let engine = RetrievalEngine::new(client, None, settings);
    let intent = Intent {
        query: "meeting agenda".to_string(),
        keywords: vec!["meeting".to_string(), "agenda".to_string()],
        time_range: None,
        intent_type: IntentType::Query,
        forced: false,
    };

    let result = engine.retrieve(&intent, true).await;
    assert!(result.error.is_none());

    let total_blocks: usize = result.docs.iter().map(|doc| doc.blocks.len()).sum();
    assert_eq!(total_blocks, 5);
    for doc in &result.docs {
        assert!(doc.blocks.len() <= 2, "doc {} over cap", doc.doc_id);
    }
}

#[tokio::test]
async fn failed_paths_yield_an_error_result_not_a_failure() {
    let (state, client, _store, _sync) = setup(&[]).await;
    *state.fail_sql.lock().unwrap() = true;
    state.fulltext_blocks.lock().unwrap().clear();

    let mut settings = RecallSettings::default();
    settings.search_paths = vec!["sql".to_string()];

    let engine = RetrievalEngine::new(client, None, settings);
    let intent = Intent {
        query: "anything at all".to_string(),
        keywords: vec!["anything".to_string()],
        time_range: None,
        intent_type: IntentType::Query,
        forced: false,
    };

    let result = engine.retrieve(&intent, true).await;
    assert!(result.docs.is_empty());
    assert_eq!(result.error.as_deref(), Some("No results found"));
}

#[tokio::test]
async fn linked_docs_fetch_full_markdown() {
    let (state, client, _store, _sync) = setup(&[]).await;
    state.docs.lock().unwrap().push(work_doc(
        "20220802180638-lhtbfty",
        "design doc",
        "# design doc\nthe whole plan\n{: id=\"y\"}",
    ));

    let resolver = LinkedDocResolver::new(client, LinkedDocSettings::default());
    let docs = resolver
        .resolve("have a look at http://127.0.0.1:9081?id=20220802180638-lhtbfty")
        .await;

    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc.doc_id, "20220802180638-lhtbfty");
    let markdown = doc.markdown.as_deref().unwrap();
    assert!(markdown.contains("the whole plan"));
    assert!(!markdown.contains("{:"));
    assert_eq!(doc.hpath, "/Work/design doc");
    assert!(state.called("getBlockKramdown"));
}

#[tokio::test]
async fn linked_doc_failures_do_not_block_other_ids() {
    let (state, client, _store, _sync) = setup(&[]).await;
    state.docs.lock().unwrap().push(work_doc(
        "20220802180638-aaaaaaa",
        "alive",
        "# alive\nstill here",
    ));

    let resolver = LinkedDocResolver::new(client, LinkedDocSettings::default());
    let docs = resolver
        .resolve("20220802180638-aaaaaaa and also 20220802180638-missing1")
        .await;

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].doc_id, "20220802180638-aaaaaaa");
}

#[tokio::test]
async fn health_check_never_fails() {
    let (_state, client, _store, _sync) = setup(&[]).await;
    let health = client.health_check().await;
    assert!(health.available);
    assert_eq!(health.version.as_deref(), Some("3.1.0"));

    // A dead endpoint maps to unavailable, not an error.
    let mut settings = SiyuanSettings::default();
    settings.api_url = "http://127.0.0.1:9".to_string();
    settings.request_timeout_ms = 300;
    let dead = SiyuanClient::new(&settings);
    let health = dead.health_check().await;
    assert!(!health.available);
    assert!(health.error.is_some());
}

#[tokio::test]
async fn remote_error_codes_surface_as_remote_errors() {
    let (state, client, _store, _sync) = setup(&[]).await;
    *state.fail_sql.lock().unwrap() = true;

    let err = client.sql("SELECT 1").await.unwrap_err();
    match err {
        RecallError::Remote { code, msg } => {
            assert_eq!(code, 500);
            assert!(msg.contains("unavailable"));
        }
        other => panic!("expected Remote error, got {other:?}"),
    }
}
