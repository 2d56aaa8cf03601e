//! Database row types — these map directly to SQLite rows.
//! Conversion into the wire models happens here so callers never see raw
//! text ids or timestamps.
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use campus_types::models::{GroupMember, GroupMessage, StudyGroup, User};
use campus_types::routes::Role;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

pub struct MemberRow {
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub joined_at: String,
}

pub struct MessageRow {
    pub seq: i64,
    pub id: String,
    pub group_id: String,
    pub author_id: String,
    pub author_username: String,
    pub body: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_model(self) -> Result<User> {
        Ok(User {
            id: parse_uuid(&self.id)?,
            role: self.role.parse::<Role>()?,
            created_at: parse_timestamp(&self.created_at)?,
            username: self.username,
        })
    }
}

impl GroupRow {
    pub fn into_model(self) -> Result<StudyGroup> {
        Ok(StudyGroup {
            id: parse_uuid(&self.id)?,
            created_by: parse_uuid(&self.created_by)?,
            created_at: parse_timestamp(&self.created_at)?,
            name: self.name,
            description: self.description,
        })
    }
}

impl MemberRow {
    pub fn into_model(self) -> Result<GroupMember> {
        Ok(GroupMember {
            user_id: parse_uuid(&self.user_id)?,
            role: self.role.parse::<Role>()?,
            joined_at: parse_timestamp(&self.joined_at)?,
            username: self.username,
        })
    }
}

impl MessageRow {
    pub fn into_model(self) -> Result<GroupMessage> {
        Ok(GroupMessage {
            seq: self.seq,
            id: parse_uuid(&self.id)?,
            group_id: parse_uuid(&self.group_id)?,
            author_id: parse_uuid(&self.author_id)?,
            created_at: parse_timestamp(&self.created_at)?,
            author_username: self.author_username,
            body: self.body,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt uuid '{}'", raw))
}

/// Rows written by this crate carry RFC 3339 timestamps; column defaults
/// produce SQLite's "YYYY-MM-DD HH:MM:SS" in UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}
