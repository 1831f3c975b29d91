use anyhow::Result;
use rusqlite::Connection;

use crate::Database;
use crate::models::SessionRow;
use crate::queries::OptionalExt;

impl Database {
    pub fn insert_session(&self, session: &SessionRow) -> Result<()> {
        self.with_conn(|conn| insert(conn, session))
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, csrf_token, created_at, expires_at FROM sessions WHERE id = ?1",
                [id],
                |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        csrf_token: row.get(2)?,
                        created_at: row.get(3)?,
                        expires_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Atomically drop `old_id` (if any) and insert `session`. Either both
    /// happen or neither does, so a fixated identifier never survives login.
    pub fn replace_session(&self, old_id: Option<&str>, session: &SessionRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(old_id) = old_id {
                tx.execute("DELETE FROM sessions WHERE id = ?1", [old_id])?;
            }
            insert(&tx, session)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn delete_session(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM sessions WHERE id = ?1", [id])? > 0))
    }

    /// Delete every session whose `expires_at` is at or before `now`.
    pub fn delete_expired_sessions(&self, now: &str) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?))
    }
}

fn insert(conn: &Connection, session: &SessionRow) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, user_id, csrf_token, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            session.id,
            session.user_id,
            session.csrf_token,
            session.created_at,
            session.expires_at,
        ],
    )?;
    Ok(())
}
