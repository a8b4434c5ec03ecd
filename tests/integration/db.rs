use chrono::{Duration, Utc};
use sqlx::AnyPool;
use tempfile::TempDir;
use wa_dispatch::db::{self, DbKind, MessageRecord};

async fn create_test_pool(temp_dir: &TempDir) -> (AnyPool, DbKind) {
    sqlx::any::install_default_drivers();
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
    let pool = AnyPool::connect(&db_url).await.unwrap();
    let kind = DbKind::Sqlite;
    db::init_db(&pool, kind).await.unwrap();
    (pool, kind)
}

fn inbound_at(id: &str, peer: &str, body: &str, minutes_ago: i64) -> MessageRecord {
    let mut record = MessageRecord::inbound(id, peer, None, Some("Ana".to_string()), body, "text");
    record.created_at = Utc::now() - Duration::minutes(minutes_ago);
    record
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&temp_dir).await;
    db::init_db(&pool, kind).await.unwrap();
    assert_eq!(db::count_messages(&pool, kind).await.unwrap(), 0);
}

#[tokio::test]
async fn test_insert_and_exists() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&temp_dir).await;

    let record = inbound_at("wamid.1", "5561999990000", "Oi", 0);
    db::insert_message(&pool, kind, &record).await.unwrap();

    assert!(db::message_exists(&pool, kind, "wamid.1").await.unwrap());
    assert!(!db::message_exists(&pool, kind, "wamid.2").await.unwrap());
    assert_eq!(db::count_messages(&pool, kind).await.unwrap(), 1);
}

#[tokio::test]
async fn test_insert_inbound_once_dedupes() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&temp_dir).await;

    let first = inbound_at("wamid.dup", "5561999990000", "Oi", 0);
    let retry = inbound_at("wamid.dup", "5561999990000", "Oi", 0);
    assert!(db::insert_inbound_once(&pool, kind, &first).await.unwrap());
    assert!(!db::insert_inbound_once(&pool, kind, &retry).await.unwrap());
    assert_eq!(db::count_messages(&pool, kind).await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_inbound_retries_store_one_copy() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&temp_dir).await;

    let first = inbound_at("wamid.race", "5561999990000", "Tenho Interesse", 0);
    let retry = inbound_at("wamid.race", "5561999990000", "Tenho Interesse", 0);
    let (a, b) = tokio::join!(
        db::insert_inbound_once(&pool, kind, &first),
        db::insert_inbound_once(&pool, kind, &retry),
    );
    let stored = [a.unwrap(), b.unwrap()];
    assert_eq!(stored.iter().filter(|new| **new).count(), 1);
    assert_eq!(db::count_messages(&pool, kind).await.unwrap(), 1);
}

#[tokio::test]
async fn test_outbound_rows_without_provider_id_coexist() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&temp_dir).await;

    for body in ["um", "dois"] {
        let record = MessageRecord::outbound(None, "5561999990000", body, "text");
        db::insert_message(&pool, kind, &record).await.unwrap();
    }
    assert_eq!(db::count_messages(&pool, kind).await.unwrap(), 2);
}

#[tokio::test]
async fn test_list_messages_oldest_first() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&temp_dir).await;

    db::insert_message(&pool, kind, &inbound_at("wamid.b", "5561999990000", "segunda", 1))
        .await
        .unwrap();
    db::insert_message(&pool, kind, &inbound_at("wamid.a", "5561999990000", "primeira", 5))
        .await
        .unwrap();
    db::insert_message(&pool, kind, &inbound_at("wamid.c", "5561888880000", "outro", 0))
        .await
        .unwrap();

    let messages = db::list_messages(&pool, kind, "5561999990000", 10, 0).await.unwrap();
    let bodies: Vec<&str> = messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["primeira", "segunda"]);
    assert_eq!(messages[0].sender_name.as_deref(), Some("Ana"));

    let page = db::list_messages(&pool, kind, "5561999990000", 1, 1).await.unwrap();
    assert_eq!(page[0].body, "segunda");
}

#[tokio::test]
async fn test_conversations_summary_and_read() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&temp_dir).await;

    db::insert_message(&pool, kind, &inbound_at("wamid.1", "5561999990000", "Oi", 10))
        .await
        .unwrap();
    db::insert_message(&pool, kind, &inbound_at("wamid.2", "5561999990000", "Tenho Interesse", 9))
        .await
        .unwrap();
    let mut reply = MessageRecord::outbound(Some("wamid.3".to_string()), "5561999990000", "Olá!", "text");
    reply.created_at = Utc::now() - Duration::minutes(8);
    db::insert_message(&pool, kind, &reply).await.unwrap();
    db::insert_message(&pool, kind, &inbound_at("wamid.4", "5561888880000", "Bom dia", 20))
        .await
        .unwrap();

    let conversations = db::list_conversations(&pool, kind, 10, 0).await.unwrap();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].peer, "5561999990000");
    assert_eq!(conversations[0].last_body.as_deref(), Some("Olá!"));
    assert_eq!(conversations[0].unread, 2);
    assert_eq!(conversations[0].sender_name.as_deref(), Some("Ana"));
    assert_eq!(conversations[1].unread, 1);

    let updated = db::mark_conversation_read(&pool, kind, "5561999990000").await.unwrap();
    assert_eq!(updated, 2);
    let conversations = db::list_conversations(&pool, kind, 10, 0).await.unwrap();
    assert_eq!(conversations[0].unread, 0);
    assert_eq!(conversations[1].unread, 1);
}

#[tokio::test]
async fn test_mark_answered() {
    let temp_dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&temp_dir).await;

    db::insert_message(&pool, kind, &inbound_at("wamid.1", "5561999990000", "Oi", 1))
        .await
        .unwrap();
    assert_eq!(db::mark_conversation_answered(&pool, kind, "5561999990000").await.unwrap(), 1);
    let messages = db::list_messages(&pool, kind, "5561999990000", 10, 0).await.unwrap();
    assert!(messages[0].answered);
    assert!(!messages[0].visualized);
}
