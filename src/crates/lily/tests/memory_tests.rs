//! Memory engine integration tests: capture, quota, consolidation, recall.

use lily::config::MemoryConfig;
use lily::db::Database;
use lily::extraction::FactCandidate;
use lily::memory::{ChatMessage, MemoryEngine, StoreResult, WRAP_CLOSE, WRAP_OPEN};
use lily::models::TtlClass;
use std::sync::Arc;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> MemoryConfig {
    MemoryConfig {
        // Vector search needs a live embedding service; keep it off here.
        vector_search: false,
        topic_history_path: dir
            .path()
            .join("topic.json")
            .to_string_lossy()
            .into_owned(),
        ..MemoryConfig::default()
    }
}

async fn engine(dir: &TempDir) -> MemoryEngine {
    engine_with_db(dir).await.0
}

async fn engine_with_db(dir: &TempDir) -> (MemoryEngine, Arc<Database>) {
    let db = Arc::new(Database::in_memory().await.unwrap());
    let engine = MemoryEngine::new(db.clone(), test_config(dir));
    engine.init().await.unwrap();
    (engine, db)
}

fn candidate(entity: &str, key: &str, value: &str) -> FactCandidate {
    FactCandidate {
        entity: entity.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[tokio::test]
async fn test_capture_then_recall_round_trip() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    let messages = vec![ChatMessage::user(
        "Kevin prefers TypeScript for new services",
    )];
    let outcome = engine.capture("session-1", &messages).await.unwrap();
    assert_eq!(outcome.stored, 1);
    assert_eq!(outcome.blocked, 0);

    let stored = engine
        .decisions()
        .find_live_fact("Kevin", "prefers")
        .await
        .unwrap()
        .expect("fact stored");
    assert_eq!(stored.fact_value.as_deref(), Some("TypeScript for new services"));
    assert_eq!(stored.ttl(), TtlClass::Active);
    assert_eq!(stored.importance, 0.5);

    let payload = engine
        .build_recall_payload("what language does Kevin like")
        .await
        .unwrap()
        .expect("payload expected");
    assert!(payload.starts_with(WRAP_OPEN));
    assert!(payload.ends_with(WRAP_CLOSE));
    assert!(payload.contains("TypeScript for new services"));
}

#[tokio::test]
async fn test_capture_updates_existing_fact_in_place() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    engine
        .capture("s", &[ChatMessage::user("Kevin prefers TypeScript for new services")])
        .await
        .unwrap();
    let outcome = engine
        .capture("s", &[ChatMessage::user("Kevin prefers Rust for new services these days")])
        .await
        .unwrap();
    assert_eq!(outcome.stored, 0);
    assert_eq!(outcome.updated, 1);

    let row = engine
        .decisions()
        .find_live_fact("Kevin", "prefers")
        .await
        .unwrap()
        .unwrap();
    assert!(row.fact_value.unwrap().contains("Rust"));
}

#[tokio::test]
async fn test_capture_respects_per_turn_cap() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    let text = (0..10)
        .map(|i| format!("Kevin.fact{} = value number {}", i, i))
        .collect::<Vec<_>>()
        .join("\n");
    let outcome = engine.capture("s", &[ChatMessage::user(text)]).await.unwrap();
    assert_eq!(outcome.stored + outcome.updated, 5);
}

#[tokio::test]
async fn test_assistant_facts_get_higher_importance() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    engine
        .capture("s", &[ChatMessage::assistant("Kevin prefers TypeScript for new services")])
        .await
        .unwrap();
    let row = engine
        .decisions()
        .find_live_fact("Kevin", "prefers")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.importance, 0.6);
}

#[tokio::test]
async fn test_active_quota_evicts_lowest_importance() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    // Fill the active class to its cap of 50.
    for i in 0..50 {
        engine
            .write_fact(
                "s",
                &candidate("Kevin", &format!("key{}", i), "value"),
                "user",
                None,
            )
            .await
            .unwrap();
    }
    assert_eq!(
        engine.decisions().count_live(TtlClass::Active).await.unwrap(),
        50
    );

    // Mark one row clearly least important.
    let victim = engine
        .decisions()
        .find_live_fact("Kevin", "key7")
        .await
        .unwrap()
        .unwrap();
    engine
        .decisions()
        .update_importance(&victim.id, 0.1)
        .await
        .unwrap();

    // Insert number 51; the low-importance row is evicted.
    engine
        .write_fact("s", &candidate("Kevin", "key50", "value"), "user", None)
        .await
        .unwrap();
    assert_eq!(
        engine.decisions().count_live(TtlClass::Active).await.unwrap(),
        50
    );
    assert!(engine
        .decisions()
        .find_live_fact("Kevin", "key7")
        .await
        .unwrap()
        .is_none());
    assert!(engine
        .decisions()
        .find_live_fact("Kevin", "key50")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_permanent_overflow_demotes_oldest() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    for i in 0..15 {
        engine
            .write_fact(
                "s",
                &candidate("project", &format!("perm{}", i), "value"),
                "tool",
                Some(TtlClass::Permanent),
            )
            .await
            .unwrap();
    }
    assert_eq!(
        engine
            .decisions()
            .count_live(TtlClass::Permanent)
            .await
            .unwrap(),
        15
    );

    // The sixteenth permanent fact demotes the oldest instead of refusing.
    let result = engine
        .write_fact(
            "s",
            &candidate("project", "perm15", "value"),
            "tool",
            Some(TtlClass::Permanent),
        )
        .await
        .unwrap();
    assert!(matches!(result, StoreResult::Inserted { ttl: TtlClass::Permanent, .. }));
    assert_eq!(
        engine
            .decisions()
            .count_live(TtlClass::Permanent)
            .await
            .unwrap(),
        15
    );
    let demoted = engine.decisions().count_live(TtlClass::Stable).await.unwrap();
    assert_eq!(demoted, 1);
}

#[tokio::test]
async fn test_status_key_downgrades_requested_permanent() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    let result = engine
        .write_fact(
            "s",
            &candidate("Kevin", "status_x", "done"),
            "tool",
            Some(TtlClass::Permanent),
        )
        .await
        .unwrap();
    match result {
        StoreResult::Inserted { ttl, .. } => assert_eq!(ttl, TtlClass::Session),
        other => panic!("unexpected result: {:?}", other),
    }
    let row = engine
        .decisions()
        .find_live_fact("Kevin", "status_x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.ttl(), TtlClass::Session);
    assert!(row.expires_at.is_some());
}

#[tokio::test]
async fn test_consolidation_keeps_latest_and_boosts() {
    let dir = TempDir::new().unwrap();
    let (engine, db) = engine_with_db(&dir).await;
    let vectors = lily::VectorRepository::new(db);

    // Two live rows for the same (entity, key), inserted directly so both
    // survive until consolidation.
    let mut older = lily::models::Decision::fact(
        "s",
        "Kevin",
        "prefers",
        "TypeScript",
        TtlClass::Active,
        0.5,
    );
    older.ts -= 1000;
    older.last_accessed = Some(older.ts);
    let newer = lily::models::Decision::fact(
        "s",
        "Kevin",
        "prefers",
        "Rust",
        TtlClass::Active,
        0.6,
    );
    engine.decisions().insert(&older).await.unwrap();
    engine.decisions().insert(&newer).await.unwrap();
    vectors
        .upsert(&older.id, "Kevin.prefers = TypeScript", &[0u8; 16], "test-model")
        .await
        .unwrap();

    let report = engine.consolidate().await.unwrap();
    assert_eq!(report.groups, 1);
    assert_eq!(report.removed, 1);

    // Vectors referencing the removed row are gone with it.
    assert!(!vectors.exists(&older.id).await.unwrap());

    let survivor = engine
        .decisions()
        .find_live_fact("Kevin", "prefers")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor.id, newer.id);
    assert!((survivor.importance - 0.65).abs() < 1e-9);
    assert!(engine.decisions().find_by_id(&older.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_consolidation_importance_is_capped() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    let first = lily::models::Decision::fact("s", "Kevin", "role", "lead", TtlClass::Active, 0.94);
    let second = lily::models::Decision::fact("s", "Kevin", "role", "lead", TtlClass::Active, 0.2);
    engine.decisions().insert(&first).await.unwrap();
    engine.decisions().insert(&second).await.unwrap();

    engine.consolidate().await.unwrap();
    let survivor = engine
        .decisions()
        .find_live_fact("Kevin", "role")
        .await
        .unwrap()
        .unwrap();
    assert!(survivor.importance <= 0.95);
}

#[tokio::test]
async fn test_cooldown_suppresses_identical_payload() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    engine
        .capture("s", &[ChatMessage::user("Kevin prefers TypeScript for new services")])
        .await
        .unwrap();

    let first = engine
        .build_recall_payload("what language does Kevin like")
        .await
        .unwrap();
    assert!(first.is_some());

    // The identical payload is suppressed the second time.
    let second = engine
        .build_recall_payload("what language does Kevin like")
        .await
        .unwrap();
    assert!(second.is_none());

    // After a compaction signal it may inject again.
    engine.after_compaction();
    let third = engine
        .build_recall_payload("what language does Kevin like")
        .await
        .unwrap();
    assert!(third.is_some());
}

#[tokio::test]
async fn test_critical_pressure_suppresses_injection() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    engine
        .capture("s", &[ChatMessage::user("Kevin prefers TypeScript for new services")])
        .await
        .unwrap();

    // 95% of the cap: critical, scale 0.
    let cap = engine.config().context_token_cap;
    engine.observe_pressure(cap * 95 / 100);
    assert!(engine
        .build_recall_payload("what language does Kevin like")
        .await
        .unwrap()
        .is_none());

    engine.after_compaction();
    assert!(engine
        .build_recall_payload("what language does Kevin like")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_injection_sentinel_blocks_recapture() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    let text = format!(
        "{}## Key Facts\n- Kevin.prefers: TypeScript for new services\n{}",
        WRAP_OPEN, WRAP_CLOSE
    );
    let outcome = engine.capture("s", &[ChatMessage::user(text)]).await.unwrap();
    assert_eq!(outcome.stored, 0);
}

#[tokio::test]
async fn test_fts_search_survives_hostile_query_values() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    engine
        .write_fact(
            "s",
            &candidate("Kevin", "note", "x' OR '1'='1"),
            "tool",
            None,
        )
        .await
        .unwrap();

    // The hostile value round-trips and does not widen any query.
    let row = engine
        .decisions()
        .find_live_fact("Kevin", "note")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.fact_value.as_deref(), Some("x' OR '1'='1"));

    let unrelated = engine
        .decisions()
        .fts_search("unrelatedkeyword", 10)
        .await
        .unwrap();
    assert!(unrelated.is_empty());
}
