//! Database row types, mapped directly from SQLite rows.
//! Distinct from bazaar-types API models to keep the DB layer independent.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use bazaar_types::models::{Conversation, Message, User};

/// Fixed-width UTC timestamp so that string order equals time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw).with_context(|| format!("Corrupt timestamp '{}'", raw))?;
    Ok(ts.with_timezone(&Utc))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("Corrupt id '{}'", raw))
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub phone_number: Option<String>,
    pub created_at: String,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: parse_id(&row.id)?,
            username: row.username,
            phone_number: row.phone_number,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub user_id: Option<String>,
    pub csrf_token: String,
    pub created_at: String,
    pub expires_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub product_id: Option<String>,
    pub created_at: String,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            id: parse_id(&row.id)?,
            buyer_id: parse_id(&row.buyer_id)?,
            seller_id: parse_id(&row.seller_id)?,
            product_id: row.product_id.as_deref().map(parse_id).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_id(&row.id)?,
            conversation_id: parse_id(&row.conversation_id)?,
            sender_id: parse_id(&row.sender_id)?,
            content: row.content,
            is_read: row.is_read,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}
