use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::borrow::Cow;
use uuid::Uuid;

pub const DIRECTION_INBOUND: &str = "inbound";
pub const DIRECTION_OUTBOUND: &str = "outbound";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql<'a>(sql: &'a str, kind: DbKind) -> Cow<'a, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub whatsapp_id: Option<String>,
    pub direction: String,
    pub peer: String,
    pub recipient: Option<String>,
    pub sender_name: Option<String>,
    pub body: String,
    pub message_type: String,
    pub status: String,
    pub answered: bool,
    pub visualized: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn inbound(
        whatsapp_id: &str,
        peer: &str,
        recipient: Option<String>,
        sender_name: Option<String>,
        body: &str,
        message_type: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            whatsapp_id: Some(whatsapp_id.to_string()),
            direction: DIRECTION_INBOUND.to_string(),
            peer: peer.to_string(),
            recipient,
            sender_name,
            body: body.to_string(),
            message_type: message_type.to_string(),
            status: "received".to_string(),
            answered: false,
            visualized: false,
            created_at: Utc::now(),
        }
    }

    pub fn outbound(whatsapp_id: Option<String>, peer: &str, body: &str, message_type: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            whatsapp_id,
            direction: DIRECTION_OUTBOUND.to_string(),
            peer: peer.to_string(),
            recipient: Some(peer.to_string()),
            sender_name: None,
            body: body.to_string(),
            message_type: message_type.to_string(),
            status: "sent".to_string(),
            answered: true,
            visualized: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub peer: String,
    pub sender_name: Option<String>,
    pub last_body: Option<String>,
    pub last_at: DateTime<Utc>,
    pub unread: i64,
}

fn millis_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts).single().unwrap_or_else(Utc::now)
}

fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<()> {
    let stmts = vec![
        r#"CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            whatsapp_id TEXT,
            direction TEXT NOT NULL,
            peer TEXT NOT NULL,
            recipient TEXT,
            sender_name TEXT,
            body TEXT NOT NULL,
            message_type TEXT NOT NULL,
            status TEXT NOT NULL,
            answered BIGINT NOT NULL,
            visualized BIGINT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_messages_peer ON messages(peer, created_at)"#,
        r#"DROP INDEX IF EXISTS idx_messages_whatsapp_id"#,
        r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_whatsapp_id_unique ON messages(whatsapp_id)"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }

    Ok(())
}

const INSERT_MESSAGE: &str = r#"INSERT INTO messages (
            id, whatsapp_id, direction, peer, recipient, sender_name, body, message_type, status, answered, visualized, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

pub async fn insert_message(pool: &AnyPool, kind: DbKind, record: &MessageRecord) -> Result<()> {
    execute_insert(pool, kind, INSERT_MESSAGE, record).await?;
    Ok(())
}

async fn execute_insert(pool: &AnyPool, kind: DbKind, stmt: &str, record: &MessageRecord) -> Result<u64> {
    let sql = rewrite_sql(stmt, kind);
    let result = sqlx::query(sql.as_ref())
        .bind(&record.id)
        .bind(record.whatsapp_id.as_deref())
        .bind(&record.direction)
        .bind(&record.peer)
        .bind(record.recipient.as_deref())
        .bind(record.sender_name.as_deref())
        .bind(&record.body)
        .bind(&record.message_type)
        .bind(&record.status)
        .bind(record.answered as i64)
        .bind(record.visualized as i64)
        .bind(datetime_to_millis(record.created_at))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn message_exists(pool: &AnyPool, kind: DbKind, whatsapp_id: &str) -> Result<bool> {
    let sql = rewrite_sql("SELECT 1 FROM messages WHERE whatsapp_id = ? LIMIT 1", kind);
    let row = sqlx::query(sql.as_ref())
        .bind(whatsapp_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Stores an inbound message unless one with the same provider id exists.
///
/// The unique index on `whatsapp_id` decides, so concurrent webhook retries store
/// (and report as new) exactly one copy.
pub async fn insert_inbound_once(pool: &AnyPool, kind: DbKind, record: &MessageRecord) -> Result<bool> {
    if record.whatsapp_id.is_none() {
        insert_message(pool, kind, record).await?;
        return Ok(true);
    }
    let stmt = format!("{INSERT_MESSAGE} ON CONFLICT (whatsapp_id) DO NOTHING");
    Ok(execute_insert(pool, kind, &stmt, record).await? == 1)
}

pub async fn count_messages(pool: &AnyPool, kind: DbKind) -> Result<i64> {
    let sql = rewrite_sql("SELECT COUNT(*) AS total FROM messages", kind);
    let row = sqlx::query(sql.as_ref()).fetch_one(pool).await?;
    Ok(row.try_get::<i64, _>("total")?)
}

pub async fn list_conversations(pool: &AnyPool, kind: DbKind, limit: i64, offset: i64) -> Result<Vec<ConversationSummary>> {
    let sql = rewrite_sql(
        r#"SELECT m.peer AS peer,
                  MAX(m.created_at) AS last_at,
                  CAST(COALESCE(SUM(CASE WHEN m.direction = 'inbound' AND m.visualized = 0 THEN 1 ELSE 0 END), 0) AS BIGINT) AS unread,
                  (SELECT l.body FROM messages l WHERE l.peer = m.peer ORDER BY l.created_at DESC LIMIT 1) AS last_body,
                  (SELECT n.sender_name FROM messages n WHERE n.peer = m.peer AND n.sender_name IS NOT NULL ORDER BY n.created_at DESC LIMIT 1) AS sender_name
           FROM messages m
           GROUP BY m.peer
           ORDER BY last_at DESC
           LIMIT ? OFFSET ?"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let mut result = Vec::new();
    for row in rows {
        let last_at: i64 = row.try_get("last_at")?;
        result.push(ConversationSummary {
            peer: row.try_get("peer")?,
            sender_name: row.try_get("sender_name")?,
            last_body: row.try_get("last_body")?,
            last_at: millis_to_datetime(last_at),
            unread: row.try_get("unread")?,
        });
    }
    Ok(result)
}

fn message_from_row(row: &AnyRow) -> Result<MessageRecord> {
    let answered: i64 = row.try_get("answered")?;
    let visualized: i64 = row.try_get("visualized")?;
    let created_at: i64 = row.try_get("created_at")?;
    Ok(MessageRecord {
        id: row.try_get("id")?,
        whatsapp_id: row.try_get("whatsapp_id")?,
        direction: row.try_get("direction")?,
        peer: row.try_get("peer")?,
        recipient: row.try_get("recipient")?,
        sender_name: row.try_get("sender_name")?,
        body: row.try_get("body")?,
        message_type: row.try_get("message_type")?,
        status: row.try_get("status")?,
        answered: answered != 0,
        visualized: visualized != 0,
        created_at: millis_to_datetime(created_at),
    })
}

/// Messages exchanged with `peer`, oldest first.
pub async fn list_messages(pool: &AnyPool, kind: DbKind, peer: &str, limit: i64, offset: i64) -> Result<Vec<MessageRecord>> {
    let sql = rewrite_sql(
        r#"SELECT id, whatsapp_id, direction, peer, recipient, sender_name, body, message_type, status, answered, visualized, created_at
           FROM messages WHERE peer = ? ORDER BY created_at ASC LIMIT ? OFFSET ?"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref())
        .bind(peer)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    rows.iter().map(message_from_row).collect()
}

pub async fn mark_conversation_read(pool: &AnyPool, kind: DbKind, peer: &str) -> Result<u64> {
    let sql = rewrite_sql(
        "UPDATE messages SET visualized = 1 WHERE peer = ? AND direction = 'inbound' AND visualized = 0",
        kind,
    );
    let done = sqlx::query(sql.as_ref()).bind(peer).execute(pool).await?;
    Ok(done.rows_affected())
}

pub async fn mark_conversation_answered(pool: &AnyPool, kind: DbKind, peer: &str) -> Result<u64> {
    let sql = rewrite_sql(
        "UPDATE messages SET answered = 1 WHERE peer = ? AND direction = 'inbound' AND answered = 0",
        kind,
    );
    let done = sqlx::query(sql.as_ref()).bind(peer).execute(pool).await?;
    Ok(done.rows_affected())
}
