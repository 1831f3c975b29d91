use rusqlite::{Connection, Row};
use uuid::Uuid;

use bazaar_types::models::{Conversation, Message};

use crate::models::{ConversationRow, MessageRow, now_timestamp};
use crate::queries::OptionalExt;
use crate::{Database, StoreError};

const CONVERSATION_COLUMNS: &str = "id, buyer_id, seller_id, product_id, created_at";
const MESSAGE_COLUMNS: &str = "seq, id, conversation_id, sender_id, content, is_read, created_at";

pub struct NewConversation {
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub product_id: Option<Uuid>,
}

/// Outcome of `create_conversation`.
pub enum Created {
    New(Conversation),
    /// Duplicates were disallowed and this triple already had a thread.
    Existing(Conversation),
}

impl Database {
    /// Every conversation the user takes part in, newest first.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, StoreError> {
        self.transaction(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE buyer_id = ?1 OR seller_id = ?1
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], conversation_row)?
                .collect::<Result<Vec<_>, _>>()?;
            to_models(rows)
        })
    }

    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StoreError> {
        self.transaction(|conn| query_conversation(conn, id))
    }

    /// Create a conversation between two existing users.
    ///
    /// With `allow_duplicates == false` an existing conversation for the same
    /// (buyer, seller, product) triple is returned instead of inserting.
    pub fn create_conversation(
        &self,
        new: &NewConversation,
        allow_duplicates: bool,
    ) -> Result<Created, StoreError> {
        self.transaction(|conn| {
            for user_id in [new.buyer_id, new.seller_id] {
                if !exists(conn, "users", user_id)? {
                    return Err(StoreError::UnknownUser);
                }
            }
            if let Some(product_id) = new.product_id {
                if !exists(conn, "products", product_id)? {
                    return Err(StoreError::UnknownProduct);
                }
            }

            let buyer_id = new.buyer_id.to_string();
            let seller_id = new.seller_id.to_string();
            let product_id = new.product_id.map(|id| id.to_string());

            if !allow_duplicates {
                let sql = format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE buyer_id = ?1 AND seller_id = ?2 AND product_id IS ?3
                     ORDER BY created_at ASC LIMIT 1"
                );
                let existing = conn
                    .query_row(&sql, rusqlite::params![buyer_id, seller_id, product_id], conversation_row)
                    .optional()?;
                if let Some(row) = existing {
                    return Ok(Created::Existing(row.try_into()?));
                }
            }

            let row = ConversationRow {
                id: Uuid::new_v4().to_string(),
                buyer_id,
                seller_id,
                product_id,
                created_at: now_timestamp(),
            };
            conn.execute(
                "INSERT INTO conversations (id, buyer_id, seller_id, product_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![row.id, row.buyer_id, row.seller_id, row.product_id, row.created_at],
            )?;
            Ok(Created::New(row.try_into()?))
        })
    }

    /// All messages of a conversation, oldest first.
    pub fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, StoreError> {
        self.transaction(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY seq ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([conversation_id.to_string()], message_row)?
                .collect::<Result<Vec<_>, _>>()?;
            to_models(rows)
        })
    }

    /// Persist a message from one of the conversation's participants.
    ///
    /// `seq` and `created_at` are assigned under the DB lock, and `created_at`
    /// never goes below the newest message already stored, so listing by
    /// `seq` is also non-decreasing in time even if the wall clock steps back.
    pub fn create_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.transaction(|conn| {
            let conversation = query_conversation(conn, conversation_id)?.ok_or(StoreError::NotFound)?;
            if !conversation.is_participant(sender_id) {
                return Err(StoreError::NotParticipant);
            }

            let cid = conversation_id.to_string();
            let latest: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [&cid],
                |row| row.get(0),
            )?;
            let now = now_timestamp();
            let created_at = match latest {
                Some(latest) if latest > now => latest,
                _ => now,
            };

            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![id, cid, sender_id.to_string(), content, created_at],
            )?;

            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
            let row = conn.query_row(&sql, [&id], message_row)?;
            Ok(row.try_into()?)
        })
    }

    /// Mark as read every message in the conversation NOT sent by `reader_id`.
    /// Returns how many messages flipped from unread to read.
    pub fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<usize, StoreError> {
        self.transaction(|conn| {
            let conversation = query_conversation(conn, conversation_id)?.ok_or(StoreError::NotFound)?;
            if !conversation.is_participant(reader_id) {
                return Err(StoreError::NotParticipant);
            }

            let updated = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND is_read = 0",
                (conversation_id.to_string(), reader_id.to_string()),
            )?;
            Ok(updated)
        })
    }
}

fn query_conversation(conn: &Connection, id: Uuid) -> Result<Option<Conversation>, StoreError> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], conversation_row)
        .optional()?;
    Ok(row.map(Conversation::try_from).transpose()?)
}

fn exists(conn: &Connection, table: &str, id: Uuid) -> Result<bool, StoreError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)");
    Ok(conn.query_row(&sql, [id.to_string()], |row| row.get(0))?)
}

fn to_models<R, M>(rows: Vec<R>) -> Result<Vec<M>, StoreError>
where
    M: TryFrom<R, Error = anyhow::Error>,
{
    Ok(rows.into_iter().map(M::try_from).collect::<Result<Vec<_>, _>>()?)
}

fn conversation_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        buyer_id: row.get(1)?,
        seller_id: row.get(2)?,
        product_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        conversation_id: row.get(2)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}
