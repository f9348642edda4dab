//! SQLite-backed persistent store.
//!
//! Tables:
//! - `users`: username/email (both unique), password digest, profile text
//! - `families`: name unique under case-insensitive comparison, stored with
//!   first-seen casing
//! - `memberships`: one row per (user, family) pair, composite uniqueness
//! - `posts`, `comments`, `reactions`, `messages`: scoped resources, each
//!   carrying the owning `family_id` (directly or via their post)
//!
//! All uniqueness invariants are enforced at the schema level so that
//! find-or-create races resolve by constraint violation + re-read rather
//! than check-then-act. Deleting a user or family cascades through
//! memberships and scoped resources.

pub mod feed;
pub mod membership;
pub mod users;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// A registered user. Never carries the password digest — auth lookups use
/// a dedicated accessor.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub created_at: i64,
}

/// A named family — the unit of data partitioning.
#[derive(Debug, Clone, Serialize)]
pub struct Family {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

/// A (user, family) association row.
#[derive(Debug, Clone, Serialize)]
pub struct Membership {
    pub id: String,
    pub user_id: String,
    pub family_id: String,
    pub joined_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub family_id: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub likes_count: i64,
    pub dislikes_count: i64,
    pub comments_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

    fn from_db(value: &str) -> Self {
        match value {
            "dislike" => Self::Dislike,
            _ => Self::Like,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Reaction {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub kind: ReactionKind,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub family_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: i64,
}

/// Thread-safe SQLite store shared by all request handlers.
pub struct FeedStore {
    conn: Mutex<rusqlite::Connection>,
}

impl FeedStore {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::init_schema(&conn)?;

        tracing::info!("Feed store opened at {}", db_path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests and ad hoc tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                full_name TEXT,
                bio TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS families (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memberships (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                family_id TEXT NOT NULL REFERENCES families(id) ON DELETE CASCADE,
                joined_at INTEGER NOT NULL,
                UNIQUE (user_id, family_id)
            );
            CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id);
            CREATE INDEX IF NOT EXISTS idx_memberships_family ON memberships(family_id);

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                family_id TEXT NOT NULL REFERENCES families(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                likes_count INTEGER NOT NULL DEFAULT 0,
                dislikes_count INTEGER NOT NULL DEFAULT 0,
                comments_count INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_posts_family ON posts(family_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_posts_user ON posts(user_id);

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id, created_at);

            CREATE TABLE IF NOT EXISTS reactions (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind TEXT NOT NULL CHECK (kind IN ('like', 'dislike')),
                created_at INTEGER NOT NULL,
                UNIQUE (post_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                recipient_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                family_id TEXT NOT NULL REFERENCES families(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_family ON messages(family_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id);",
        )
    }
}

/// Map a user row in `SELECT id, username, email, full_name, bio, created_at`
/// column order.
pub(crate) fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        bio: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Map a post row in `SELECT id, user_id, family_id, content, created_at,
/// updated_at, likes_count, dislikes_count, comments_count` column order.
pub(crate) fn post_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        user_id: row.get(1)?,
        family_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        likes_count: row.get(6)?,
        dislikes_count: row.get(7)?,
        comments_count: row.get(8)?,
    })
}

/// Map a message row in `SELECT id, sender_id, recipient_id, family_id,
/// content, is_read, created_at` column order.
pub(crate) fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        family_id: row.get(3)?,
        content: row.get(4)?,
        is_read: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// True when a rusqlite error is a uniqueness/constraint violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("feed.db");
        let store = FeedStore::open(&db_path).unwrap();
        drop(store);
        assert!(db_path.exists());
    }

    #[test]
    fn schema_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("feed.db");
        drop(FeedStore::open(&db_path).unwrap());
        // Re-opening runs CREATE TABLE IF NOT EXISTS again.
        drop(FeedStore::open(&db_path).unwrap());
    }
}
