use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use campus_types::models::{GroupMember, GroupMessage, StudyGroup};
use campus_types::routes::Role;

use crate::Database;
use crate::models::{GroupRow, MemberRow, MessageRow, UserRow};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, username: &str, password_hash: &str, role: Role) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), username, password_hash, role.as_str(), now()],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    // -- Study groups --

    /// Create a group and enrol its creator in one transaction.
    pub fn create_group(
        &self,
        id: Uuid,
        name: &str,
        description: Option<&str>,
        created_by: Uuid,
    ) -> Result<StudyGroup> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = now();
            tx.execute(
                "INSERT INTO study_groups (id, name, description, created_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), name, description, created_by.to_string(), created_at],
            )?;
            tx.execute(
                "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), created_by.to_string(), created_at],
            )?;
            tx.commit()?;

            GroupRow {
                id: id.to_string(),
                name: name.to_string(),
                description: description.map(str::to_string),
                created_by: created_by.to_string(),
                created_at,
            }
            .into_model()
        })
    }

    pub fn get_group(&self, id: Uuid) -> Result<Option<StudyGroup>> {
        self.with_conn(|conn| query_group(conn, "id", &id.to_string()))
    }

    pub fn get_group_by_name(&self, name: &str) -> Result<Option<StudyGroup>> {
        self.with_conn(|conn| query_group(conn, "name", name))
    }

    pub fn list_groups(&self) -> Result<Vec<StudyGroup>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, created_by, created_at FROM study_groups ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], group_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(GroupRow::into_model).collect()
        })
    }

    pub fn group_exists(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| group_exists(conn, id))
    }

    // -- Membership --

    /// Returns true if the user was newly added, false if already a member.
    pub fn add_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![group_id.to_string(), user_id.to_string(), now()],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn is_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| is_member(conn, group_id, user_id))
    }

    pub fn list_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT gm.user_id, u.username, u.role, gm.joined_at
                 FROM group_members gm
                 JOIN users u ON u.id = gm.user_id
                 WHERE gm.group_id = ?1
                 ORDER BY gm.joined_at, u.username",
            )?;
            let rows = stmt
                .query_map([group_id.to_string()], |row| {
                    Ok(MemberRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        role: row.get(2)?,
                        joined_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(MemberRow::into_model).collect()
        })
    }

    // -- Messages --

    /// Append a message. The returned record carries the `seq` the store
    /// assigned, which is larger than that of every earlier message.
    pub fn insert_message(&self, id: Uuid, group_id: Uuid, author_id: Uuid, body: &str) -> Result<GroupMessage> {
        self.with_conn(|conn| {
            let created_at = now();
            conn.execute(
                "INSERT INTO messages (id, group_id, author_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), group_id.to_string(), author_id.to_string(), body, created_at],
            )?;
            let seq = conn.last_insert_rowid();

            let author_username: String = conn
                .query_row(
                    "SELECT username FROM users WHERE id = ?1",
                    [author_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or_else(|| "unknown".to_string());

            MessageRow {
                seq,
                id: id.to_string(),
                group_id: group_id.to_string(),
                author_id: author_id.to_string(),
                author_username,
                body: body.to_string(),
                created_at,
            }
            .into_model()
        })
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // column is one of our own literals, never user input
    let sql = format!(
        "SELECT id, username, password, role, created_at FROM users WHERE {} = ?1",
        column
    );
    let row = conn
        .query_row(&sql, [value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_group(conn: &Connection, column: &str, value: &str) -> Result<Option<StudyGroup>> {
    let sql = format!(
        "SELECT id, name, description, created_by, created_at FROM study_groups WHERE {} = ?1",
        column
    );
    conn.query_row(&sql, [value], group_row)
        .optional()?
        .map(GroupRow::into_model)
        .transpose()
}

fn group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn group_exists(conn: &Connection, id: Uuid) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM study_groups WHERE id = ?1", [id.to_string()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn is_member(conn: &Connection, group_id: Uuid, user_id: Uuid) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            [group_id.to_string(), user_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}
