//! Scoped resources: posts, comments, reactions, direct messages.
//!
//! Every read here filters on the caller's active family; a resource that
//! exists in another family is reported as `NotFound`, never `Forbidden`,
//! so responses do not confirm cross-family existence. Mutations add the
//! ownership check on top of the family filter. Comments and reactions
//! inherit their family through the post they attach to.
//!
//! Post rows carry denormalized like/dislike/comment counters maintained in
//! the same transaction as the row that changes them.

use super::{
    epoch_secs, is_constraint_violation, message_from_row, post_from_row, Comment, FeedStore,
    Message, Post, Reaction, ReactionKind,
};
use crate::error::ApiError;
use uuid::Uuid;

const POST_COLUMNS: &str =
    "id, user_id, family_id, content, created_at, updated_at, likes_count, dislikes_count, comments_count";

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, family_id, content, is_read, created_at";

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Fetch a post by id within a family. Out-of-family and nonexistent posts
/// are indistinguishable.
fn post_in_family(
    conn: &rusqlite::Connection,
    post_id: &str,
    family_id: &str,
) -> Result<Post, ApiError> {
    let row = conn.query_row(
        &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1 AND family_id = ?2"),
        rusqlite::params![post_id, family_id],
        post_from_row,
    );
    match row {
        Ok(post) => Ok(post),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(ApiError::NotFound("post")),
        Err(e) => Err(e.into()),
    }
}

/// The caller's reaction row on a post, if any: (id, kind, created_at).
/// Doubles as the re-read after a lost insert race.
fn reaction_row(
    conn: &rusqlite::Connection,
    post_id: &str,
    user_id: &str,
) -> Result<Option<(String, String, i64)>, ApiError> {
    let row = conn.query_row(
        "SELECT id, kind, created_at FROM reactions WHERE post_id = ?1 AND user_id = ?2",
        rusqlite::params![post_id, user_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        },
    );
    match row {
        Ok(found) => Ok(Some(found)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl FeedStore {
    // ── Posts ───────────────────────────────────────────────────────

    pub fn create_post(
        &self,
        user_id: &str,
        family_id: &str,
        content: &str,
    ) -> Result<Post, ApiError> {
        let conn = self.conn.lock();
        let id = Uuid::new_v4().to_string();
        let now = epoch_secs();
        conn.execute(
            "INSERT INTO posts (id, user_id, family_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![id, user_id, family_id, content, now],
        )?;
        post_in_family(&conn, &id, family_id)
    }

    /// Newest-first feed for the active family.
    pub fn list_posts(
        &self,
        family_id: &str,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Post>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE family_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let posts = stmt
            .query_map(rusqlite::params![family_id, limit, skip], post_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// A member's posts, visible only inside the shared family.
    pub fn list_user_posts(
        &self,
        family_id: &str,
        user_id: &str,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Post>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE family_id = ?1 AND user_id = ?2
             ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4"
        ))?;
        let posts = stmt
            .query_map(
                rusqlite::params![family_id, user_id, limit, skip],
                post_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    pub fn get_post(&self, post_id: &str, family_id: &str) -> Result<Post, ApiError> {
        let conn = self.conn.lock();
        post_in_family(&conn, post_id, family_id)
    }

    /// Update post content. Family filter first (NotFound), then ownership
    /// (Forbidden).
    pub fn update_post(
        &self,
        post_id: &str,
        family_id: &str,
        caller_id: &str,
        content: &str,
    ) -> Result<Post, ApiError> {
        let conn = self.conn.lock();
        let post = post_in_family(&conn, post_id, family_id)?;
        if post.user_id != caller_id {
            return Err(ApiError::Forbidden("not authorized to update this post"));
        }
        conn.execute(
            "UPDATE posts SET content = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![post_id, content, epoch_secs()],
        )?;
        post_in_family(&conn, post_id, family_id)
    }

    pub fn delete_post(
        &self,
        post_id: &str,
        family_id: &str,
        caller_id: &str,
    ) -> Result<(), ApiError> {
        let conn = self.conn.lock();
        let post = post_in_family(&conn, post_id, family_id)?;
        if post.user_id != caller_id {
            return Err(ApiError::Forbidden("not authorized to delete this post"));
        }
        conn.execute("DELETE FROM posts WHERE id = ?1", rusqlite::params![post_id])?;
        Ok(())
    }

    // ── Reactions ───────────────────────────────────────────────────

    /// Set the caller's reaction on a post. Repeating the same reaction is a
    /// no-op; switching kinds moves one counter to the other.
    pub fn react(
        &self,
        post_id: &str,
        family_id: &str,
        user_id: &str,
        kind: ReactionKind,
    ) -> Result<Reaction, ApiError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        post_in_family(&tx, post_id, family_id)?;

        let reaction = match reaction_row(&tx, post_id, user_id)? {
            Some((id, stored_kind, created_at)) => {
                let stored = ReactionKind::from_db(&stored_kind);
                if stored != kind {
                    tx.execute(
                        "UPDATE reactions SET kind = ?2 WHERE id = ?1",
                        rusqlite::params![id, kind.as_str()],
                    )?;
                    let (gained, lost) = match kind {
                        ReactionKind::Like => ("likes_count", "dislikes_count"),
                        ReactionKind::Dislike => ("dislikes_count", "likes_count"),
                    };
                    tx.execute(
                        &format!(
                            "UPDATE posts SET {gained} = {gained} + 1,
                                 {lost} = MAX({lost} - 1, 0) WHERE id = ?1"
                        ),
                        rusqlite::params![post_id],
                    )?;
                }
                Reaction {
                    id,
                    post_id: post_id.to_owned(),
                    user_id: user_id.to_owned(),
                    kind,
                    created_at,
                }
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let now = epoch_secs();
                let inserted = tx.execute(
                    "INSERT INTO reactions (id, post_id, user_id, kind, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, post_id, user_id, kind.as_str(), now],
                );
                match inserted {
                    Ok(_) => {
                        let counter = match kind {
                            ReactionKind::Like => "likes_count",
                            ReactionKind::Dislike => "dislikes_count",
                        };
                        tx.execute(
                            &format!("UPDATE posts SET {counter} = {counter} + 1 WHERE id = ?1"),
                            rusqlite::params![post_id],
                        )?;
                        Reaction {
                            id,
                            post_id: post_id.to_owned(),
                            user_id: user_id.to_owned(),
                            kind,
                            created_at: now,
                        }
                    }
                    // Lost the race to a concurrent reaction from the same
                    // user; the winner's row and counter bump stand.
                    Err(e) if is_constraint_violation(&e) => {
                        let (id, stored_kind, created_at) =
                            reaction_row(&tx, post_id, user_id)?.ok_or(ApiError::Store(e))?;
                        Reaction {
                            id,
                            post_id: post_id.to_owned(),
                            user_id: user_id.to_owned(),
                            kind: ReactionKind::from_db(&stored_kind),
                            created_at,
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        tx.commit()?;
        Ok(reaction)
    }

    /// Remove the caller's reaction from a post.
    pub fn remove_reaction(
        &self,
        post_id: &str,
        family_id: &str,
        user_id: &str,
    ) -> Result<(), ApiError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        post_in_family(&tx, post_id, family_id)?;

        let kind: String = match tx.query_row(
            "SELECT kind FROM reactions WHERE post_id = ?1 AND user_id = ?2",
            rusqlite::params![post_id, user_id],
            |row| row.get(0),
        ) {
            Ok(kind) => kind,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(ApiError::NotFound("reaction"))
            }
            Err(e) => return Err(e.into()),
        };

        tx.execute(
            "DELETE FROM reactions WHERE post_id = ?1 AND user_id = ?2",
            rusqlite::params![post_id, user_id],
        )?;
        let counter = match ReactionKind::from_db(&kind) {
            ReactionKind::Like => "likes_count",
            ReactionKind::Dislike => "dislikes_count",
        };
        tx.execute(
            &format!("UPDATE posts SET {counter} = MAX({counter} - 1, 0) WHERE id = ?1"),
            rusqlite::params![post_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── Comments ────────────────────────────────────────────────────

    pub fn list_comments(
        &self,
        post_id: &str,
        family_id: &str,
    ) -> Result<Vec<Comment>, ApiError> {
        let conn = self.conn.lock();
        post_in_family(&conn, post_id, family_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, post_id, user_id, content, created_at, updated_at
             FROM comments WHERE post_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let comments = stmt
            .query_map(rusqlite::params![post_id], comment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    pub fn create_comment(
        &self,
        post_id: &str,
        family_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<Comment, ApiError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        post_in_family(&tx, post_id, family_id)?;

        let id = Uuid::new_v4().to_string();
        let now = epoch_secs();
        tx.execute(
            "INSERT INTO comments (id, post_id, user_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![id, post_id, user_id, content, now],
        )?;
        tx.execute(
            "UPDATE posts SET comments_count = comments_count + 1 WHERE id = ?1",
            rusqlite::params![post_id],
        )?;
        tx.commit()?;

        Ok(Comment {
            id,
            post_id: post_id.to_owned(),
            user_id: user_id.to_owned(),
            content: content.to_owned(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a comment whose parent post is inside the family.
    fn comment_in_family(
        conn: &rusqlite::Connection,
        comment_id: &str,
        family_id: &str,
    ) -> Result<Comment, ApiError> {
        let row = conn.query_row(
            "SELECT c.id, c.post_id, c.user_id, c.content, c.created_at, c.updated_at
             FROM comments c JOIN posts p ON p.id = c.post_id
             WHERE c.id = ?1 AND p.family_id = ?2",
            rusqlite::params![comment_id, family_id],
            comment_from_row,
        );
        match row {
            Ok(comment) => Ok(comment),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(ApiError::NotFound("comment")),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_comment(
        &self,
        comment_id: &str,
        family_id: &str,
        caller_id: &str,
        content: &str,
    ) -> Result<Comment, ApiError> {
        let conn = self.conn.lock();
        let comment = Self::comment_in_family(&conn, comment_id, family_id)?;
        if comment.user_id != caller_id {
            return Err(ApiError::Forbidden("not authorized to update this comment"));
        }
        conn.execute(
            "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![comment_id, content, epoch_secs()],
        )?;
        Self::comment_in_family(&conn, comment_id, family_id)
    }

    pub fn delete_comment(
        &self,
        comment_id: &str,
        family_id: &str,
        caller_id: &str,
    ) -> Result<(), ApiError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let comment = Self::comment_in_family(&tx, comment_id, family_id)?;
        if comment.user_id != caller_id {
            return Err(ApiError::Forbidden("not authorized to delete this comment"));
        }
        tx.execute(
            "DELETE FROM comments WHERE id = ?1",
            rusqlite::params![comment_id],
        )?;
        tx.execute(
            "UPDATE posts SET comments_count = MAX(comments_count - 1, 0) WHERE id = ?1",
            rusqlite::params![comment.post_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── Direct messages ─────────────────────────────────────────────

    /// Record a message inside the active family. Both participants'
    /// membership is the session layer's concern; the row simply carries the
    /// partition key.
    pub fn send_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        family_id: &str,
        content: &str,
    ) -> Result<Message, ApiError> {
        let conn = self.conn.lock();
        let id = Uuid::new_v4().to_string();
        let now = epoch_secs();
        conn.execute(
            "INSERT INTO messages (id, sender_id, recipient_id, family_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id, sender_id, recipient_id, family_id, content, now],
        )?;
        Ok(Message {
            id,
            sender_id: sender_id.to_owned(),
            recipient_id: recipient_id.to_owned(),
            family_id: family_id.to_owned(),
            content: content.to_owned(),
            is_read: false,
            created_at: now,
        })
    }

    /// Latest message per conversation peer, newest conversation first.
    pub fn list_conversations(
        &self,
        user_id: &str,
        family_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE family_id = ?1 AND (sender_id = ?2 OR recipient_id = ?2)
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let all = stmt
            .query_map(rusqlite::params![family_id, user_id], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // First (newest) message per peer wins.
        let mut seen: Vec<String> = Vec::new();
        let mut latest = Vec::new();
        for message in all {
            let peer = if message.sender_id == user_id {
                message.recipient_id.clone()
            } else {
                message.sender_id.clone()
            };
            if !seen.contains(&peer) {
                seen.push(peer);
                latest.push(message);
            }
        }
        Ok(latest)
    }

    /// Full conversation with one peer, oldest first.
    pub fn conversation_with(
        &self,
        user_id: &str,
        peer_id: &str,
        family_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE family_id = ?1
               AND ((sender_id = ?2 AND recipient_id = ?3)
                 OR (sender_id = ?3 AND recipient_id = ?2))
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let messages = stmt
            .query_map(
                rusqlite::params![family_id, user_id, peer_id],
                message_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Mark a message read. Only the recipient may do this; the family
    /// filter applies first so cross-family ids read as missing.
    pub fn mark_message_read(
        &self,
        message_id: &str,
        family_id: &str,
        caller_id: &str,
    ) -> Result<Message, ApiError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND family_id = ?2"),
            rusqlite::params![message_id, family_id],
            message_from_row,
        );
        let message = match row {
            Ok(m) => m,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(ApiError::NotFound("message"))
            }
            Err(e) => return Err(e.into()),
        };
        if message.recipient_id != caller_id {
            return Err(ApiError::Forbidden(
                "not authorized to mark this message as read",
            ));
        }
        conn.execute(
            "UPDATE messages SET is_read = 1 WHERE id = ?1",
            rusqlite::params![message_id],
        )?;
        Ok(Message {
            is_read: true,
            ..message
        })
    }

    pub fn unread_count(&self, user_id: &str, family_id: &str) -> Result<i64, ApiError> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE family_id = ?1 AND recipient_id = ?2 AND is_read = 0",
            rusqlite::params![family_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Search ──────────────────────────────────────────────────────

    /// Case-insensitive substring search over post content, family-scoped.
    pub fn search_posts(
        &self,
        family_id: &str,
        query: &str,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<Post>, i64), ApiError> {
        let pattern = format!("%{query}%");
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE family_id = ?1 AND content LIKE ?2",
            rusqlite::params![family_id, pattern],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts
             WHERE family_id = ?1 AND content LIKE ?2
             ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4"
        ))?;
        let posts = stmt
            .query_map(
                rusqlite::params![family_id, pattern, limit, skip],
                post_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((posts, total))
    }

    // ── Summary selection ───────────────────────────────────────────

    /// Family posts inside a time window, newest first. Feeds the LLM
    /// summarizer.
    pub fn posts_between(
        &self,
        family_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Post>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts
             WHERE family_id = ?1 AND created_at >= ?2 AND created_at <= ?3
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let posts = stmt
            .query_map(rusqlite::params![family_id, start, end], post_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// One member's posts inside a time window, newest first.
    pub fn user_posts_between(
        &self,
        family_id: &str,
        user_id: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Post>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts
             WHERE family_id = ?1 AND user_id = ?2 AND created_at >= ?3 AND created_at <= ?4
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let posts = stmt
            .query_map(
                rusqlite::params![family_id, user_id, start, end],
                post_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Messages exchanged between two members inside a time window.
    pub fn messages_between_users(
        &self,
        family_id: &str,
        user_a: &str,
        user_b: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Message>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE family_id = ?1
               AND ((sender_id = ?2 AND recipient_id = ?3)
                 OR (sender_id = ?3 AND recipient_id = ?2))
               AND created_at >= ?4 AND created_at <= ?5
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let messages = stmt
            .query_map(
                rusqlite::params![family_id, user_a, user_b, start, end],
                message_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}
