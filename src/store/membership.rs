//! Families and memberships — the authoritative mapping of which users
//! belong to which families.
//!
//! Family names are unique under case-insensitive comparison (schema-level
//! `COLLATE NOCASE` constraint); the first-created casing is preserved and
//! wins all future case-insensitive lookups. `ensure_family` resolves the
//! find-or-create race by inserting and re-reading on constraint violation —
//! never by the existence check alone.
//!
//! `list_members_of` performs no access control of its own; the caller must
//! already have established membership in the family it asks about.

use super::{epoch_secs, is_constraint_violation, user_from_row, Family, FeedStore, Membership, User};
use crate::error::ApiError;
use uuid::Uuid;

fn family_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Family> {
    Ok(Family {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

/// Find a family by name on an open connection: exact match first, then
/// case-insensitive fallback. At most one row can match either way thanks to
/// the NOCASE uniqueness constraint.
fn find_family_on(
    conn: &rusqlite::Connection,
    name: &str,
) -> Result<Option<Family>, ApiError> {
    for collation in ["BINARY", "NOCASE"] {
        let row = conn.query_row(
            &format!("SELECT id, name, created_at FROM families WHERE name = ?1 COLLATE {collation}"),
            rusqlite::params![name],
            family_from_row,
        );
        match row {
            Ok(family) => return Ok(Some(family)),
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

/// Find-or-create a family on an open connection (or transaction). Two
/// concurrent callers with colliding names cannot both create: the loser's
/// INSERT hits the uniqueness constraint and falls back to re-reading the
/// winner's row.
pub(crate) fn ensure_family_on(
    conn: &rusqlite::Connection,
    name: &str,
) -> Result<Family, ApiError> {
    if let Some(family) = find_family_on(conn, name)? {
        return Ok(family);
    }

    let id = Uuid::new_v4().to_string();
    let now = epoch_secs();
    match conn.execute(
        "INSERT INTO families (id, name, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, name, now],
    ) {
        Ok(_) => Ok(Family {
            id,
            name: name.to_owned(),
            created_at: now,
        }),
        Err(e) if is_constraint_violation(&e) => find_family_on(conn, name)?
            .ok_or_else(|| ApiError::Store(e)),
        Err(e) => Err(e.into()),
    }
}

/// Idempotent join on an open connection (or transaction): inserting an
/// existing (user, family) pair returns the existing row without error.
pub(crate) fn join_on(
    conn: &rusqlite::Connection,
    user_id: &str,
    family_id: &str,
) -> Result<Membership, ApiError> {
    let existing = conn.query_row(
        "SELECT id, user_id, family_id, joined_at FROM memberships
         WHERE user_id = ?1 AND family_id = ?2",
        rusqlite::params![user_id, family_id],
        membership_from_row,
    );
    match existing {
        Ok(membership) => return Ok(membership),
        Err(rusqlite::Error::QueryReturnedNoRows) => {}
        Err(e) => return Err(e.into()),
    }

    let id = Uuid::new_v4().to_string();
    let now = epoch_secs();
    match conn.execute(
        "INSERT INTO memberships (id, user_id, family_id, joined_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, user_id, family_id, now],
    ) {
        Ok(_) => Ok(Membership {
            id,
            user_id: user_id.to_owned(),
            family_id: family_id.to_owned(),
            joined_at: now,
        }),
        // Lost the race to a concurrent join of the same pair.
        Err(e) if is_constraint_violation(&e) => conn
            .query_row(
                "SELECT id, user_id, family_id, joined_at FROM memberships
                 WHERE user_id = ?1 AND family_id = ?2",
                rusqlite::params![user_id, family_id],
                membership_from_row,
            )
            .map_err(Into::into),
        Err(e) => Err(e.into()),
    }
}

fn membership_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        id: row.get(0)?,
        user_id: row.get(1)?,
        family_id: row.get(2)?,
        joined_at: row.get(3)?,
    })
}

impl FeedStore {
    /// Find a family by name: exact match first, then case-insensitive.
    pub fn find_family_by_name(&self, name: &str) -> Result<Option<Family>, ApiError> {
        let conn = self.conn.lock();
        find_family_on(&conn, name.trim())
    }

    /// Look up a family by id.
    pub fn get_family(&self, family_id: &str) -> Result<Option<Family>, ApiError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT id, name, created_at FROM families WHERE id = ?1",
            rusqlite::params![family_id],
            family_from_row,
        );
        match row {
            Ok(family) => Ok(Some(family)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a family with the exact casing supplied. Fails with
    /// `DuplicateFamily` when a case-insensitive match already exists.
    pub fn create_family(&self, name: &str) -> Result<Family, ApiError> {
        let name = name.trim();
        let conn = self.conn.lock();

        let id = Uuid::new_v4().to_string();
        let now = epoch_secs();
        match conn.execute(
            "INSERT INTO families (id, name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, now],
        ) {
            Ok(_) => {
                tracing::info!(name, "Family created");
                Ok(Family {
                    id,
                    name: name.to_owned(),
                    created_at: now,
                })
            }
            Err(e) if is_constraint_violation(&e) => {
                Err(ApiError::DuplicateFamily(name.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a family and enroll its creator as the first member, in one
    /// transaction: a failed membership insert rolls the family back too.
    /// Fails with `DuplicateFamily` when a case-insensitive match already
    /// exists.
    pub fn create_family_with_member(
        &self,
        name: &str,
        user_id: &str,
    ) -> Result<(Family, Membership), ApiError> {
        let name = name.trim();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let id = Uuid::new_v4().to_string();
        let now = epoch_secs();
        match tx.execute(
            "INSERT INTO families (id, name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, now],
        ) {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(ApiError::DuplicateFamily(name.to_owned()))
            }
            Err(e) => return Err(e.into()),
        }
        let membership = join_on(&tx, user_id, &id)?;
        tx.commit()?;

        tracing::info!(name, "Family created");
        Ok((
            Family {
                id,
                name: name.to_owned(),
                created_at: now,
            },
            membership,
        ))
    }

    /// Find-or-create by name, atomic with respect to the uniqueness
    /// invariant.
    pub fn ensure_family(&self, name: &str) -> Result<Family, ApiError> {
        let conn = self.conn.lock();
        ensure_family_on(&conn, name.trim())
    }

    /// Idempotent join. Fails with `NotFound` when the family does not exist
    /// (family existence is intentionally informative).
    pub fn join(&self, user_id: &str, family_id: &str) -> Result<Membership, ApiError> {
        let conn = self.conn.lock();
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM families WHERE id = ?1",
                rusqlite::params![family_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if !exists {
            return Err(ApiError::NotFound("family"));
        }
        join_on(&conn, user_id, family_id)
    }

    /// Is the user currently a member of the family?
    pub fn is_member(&self, user_id: &str, family_id: &str) -> Result<bool, ApiError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            "SELECT 1 FROM memberships WHERE user_id = ?1 AND family_id = ?2",
            rusqlite::params![user_id, family_id],
            |_| Ok(()),
        );
        match row {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All families the user belongs to, ordered by membership creation.
    /// The first entry is the login auto-select default.
    pub fn list_families_for(&self, user_id: &str) -> Result<Vec<Family>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT f.id, f.name, f.created_at
             FROM memberships m JOIN families f ON f.id = m.family_id
             WHERE m.user_id = ?1
             ORDER BY m.joined_at ASC, m.rowid ASC",
        )?;
        let families = stmt
            .query_map(rusqlite::params![user_id], family_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(families)
    }

    /// All members of a family, ordered by join time. Access control is the
    /// caller's responsibility.
    pub fn list_members_of(&self, family_id: &str) -> Result<Vec<User>, ApiError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT u.id, u.username, u.email, u.full_name, u.bio, u.created_at
             FROM memberships m JOIN users u ON u.id = m.user_id
             WHERE m.family_id = ?1
             ORDER BY m.joined_at ASC, m.rowid ASC",
        )?;
        let users = stmt
            .query_map(rusqlite::params![family_id], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Delete a family; memberships and scoped resources cascade.
    pub fn delete_family(&self, family_id: &str) -> Result<bool, ApiError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM families WHERE id = ?1",
            rusqlite::params![family_id],
        )?;
        Ok(deleted > 0)
    }
}
