//! Paged reads of a study group's message history.
//!
//! Pages are anchored on `messages.seq`, which only ever grows. A cursor is
//! an exclusive upper bound on `seq`, so a message written after a cursor
//! was handed out can never land inside the page that cursor names, and the
//! same cursor keeps returning the same rows.

use rusqlite::params;
use uuid::Uuid;

use campus_types::api::HistoryPage;
use campus_types::pagination::PageRequest;

use crate::Database;
use crate::models::MessageRow;
use crate::queries::{group_exists, is_member};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("study group {0} not found")]
    GroupNotFound(Uuid),

    #[error("user {user_id} is not a member of study group {group_id}")]
    NotMember { group_id: Uuid, user_id: Uuid },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for HistoryError {
    fn from(e: rusqlite::Error) -> Self {
        HistoryError::Storage(e.into())
    }
}

impl Database {
    /// Fetch one page of history for `viewer`. The group check, the
    /// membership check and the page read share one read transaction.
    pub fn message_history(
        &self,
        group_id: Uuid,
        viewer: Uuid,
        page: PageRequest,
    ) -> Result<HistoryPage, HistoryError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        let tx = conn.unchecked_transaction()?;

        if !group_exists(&tx, group_id)? {
            return Err(HistoryError::GroupNotFound(group_id));
        }
        if !is_member(&tx, group_id, viewer)? {
            return Err(HistoryError::NotMember { group_id, user_id: viewer });
        }

        // One extra row tells us whether anything older remains.
        let mut stmt = tx.prepare(
            "SELECT m.seq, m.id, m.group_id, m.author_id, u.username, m.body, m.created_at
             FROM messages m
             LEFT JOIN users u ON m.author_id = u.id
             WHERE m.group_id = ?1 AND (?2 IS NULL OR m.seq < ?2)
             ORDER BY m.seq DESC
             LIMIT ?3",
        )?;

        let mut rows = stmt
            .query_map(
                params![group_id.to_string(), page.cursor, page.limit as i64 + 1],
                |row| {
                    Ok(MessageRow {
                        seq: row.get(0)?,
                        id: row.get(1)?,
                        group_id: row.get(2)?,
                        author_id: row.get(3)?,
                        author_username: row
                            .get::<_, Option<String>>(4)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        body: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        tx.finish()?;

        let has_more = rows.len() > page.limit as usize;
        rows.truncate(page.limit as usize);
        rows.reverse();

        let messages = rows
            .into_iter()
            .map(MessageRow::into_model)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let next_cursor = if has_more {
            messages.first().map(|m| m.seq)
        } else {
            None
        };

        Ok(HistoryPage { messages, next_cursor })
    }
}
