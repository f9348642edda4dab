//! User rows: creation (standalone or signup-with-families), lookup,
//! profile updates, cascading deletion.

use super::{epoch_secs, is_constraint_violation, membership, user_from_row, FeedStore, User};
use crate::error::ApiError;
use uuid::Uuid;

/// Fields required to create a user. The password arrives pre-hashed; the
/// store never sees plaintext secrets.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
}

const USER_COLUMNS: &str = "id, username, email, full_name, bio, created_at";

impl FeedStore {
    /// Create a user and join the given families (created on first use),
    /// all in one transaction — a failed membership insert never leaves an
    /// orphan family or a family-less half-signup.
    pub fn create_user_with_families(
        &self,
        new_user: &NewUser,
        family_names: &[String],
    ) -> Result<User, ApiError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let user_id = Uuid::new_v4().to_string();
        let now = epoch_secs();
        let inserted = tx.execute(
            "INSERT INTO users (id, username, email, password_hash, full_name, bio, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                user_id,
                new_user.username.trim(),
                new_user.email.trim(),
                new_user.password_hash,
                new_user.full_name,
                new_user.bio,
                now,
            ],
        );
        if let Err(e) = inserted {
            if is_constraint_violation(&e) {
                return Err(ApiError::DuplicateUser);
            }
            return Err(e.into());
        }

        for name in family_names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let family = membership::ensure_family_on(&tx, name)?;
            membership::join_on(&tx, &user_id, &family.id)?;
        }

        let user = tx.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            rusqlite::params![user_id],
            user_from_row,
        )?;
        tx.commit()?;

        tracing::info!(username = user.username, "User registered");
        Ok(user)
    }

    /// Look up a user by id.
    pub fn get_user(&self, user_id: &str) -> Result<Option<User>, ApiError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            rusqlite::params![user_id],
            user_from_row,
        );
        match row {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a user by username together with the stored password digest.
    /// Only the login flow calls this.
    pub fn find_user_auth(&self, username: &str) -> Result<Option<(User, String)>, ApiError> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE username = ?1"),
            rusqlite::params![username.trim()],
            |row| Ok((user_from_row(row)?, row.get::<_, String>(6)?)),
        );
        match row {
            Ok(pair) => Ok(Some(pair)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Update the caller's own mutable profile fields. `None` leaves a field
    /// untouched.
    pub fn update_profile(
        &self,
        user_id: &str,
        full_name: Option<&str>,
        bio: Option<&str>,
    ) -> Result<User, ApiError> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET
                full_name = COALESCE(?2, full_name),
                bio = COALESCE(?3, bio),
                updated_at = ?4
             WHERE id = ?1",
            rusqlite::params![user_id, full_name, bio, epoch_secs()],
        )?;
        if updated == 0 {
            return Err(ApiError::NotFound("user"));
        }
        let user = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            rusqlite::params![user_id],
            user_from_row,
        )?;
        Ok(user)
    }

    /// Delete a user; memberships and owned resources cascade.
    pub fn delete_user(&self, user_id: &str) -> Result<bool, ApiError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM users WHERE id = ?1",
            rusqlite::params![user_id],
        )?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn store() -> FeedStore {
        FeedStore::open_in_memory().unwrap()
    }

    pub(crate) fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{username}@example.com"),
            password_hash: "salt$hash".into(),
            full_name: None,
            bio: None,
        }
    }

    #[test]
    fn create_and_get_user() {
        let store = store();
        let user = store
            .create_user_with_families(&new_user("alice"), &[])
            .unwrap();
        let fetched = store.get_user(&user.id).unwrap().unwrap();
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.email, "alice@example.com");
    }

    #[test]
    fn duplicate_username_rejected() {
        let store = store();
        store
            .create_user_with_families(&new_user("alice"), &[])
            .unwrap();
        let mut dup = new_user("alice");
        dup.email = "other@example.com".into();
        assert!(matches!(
            store.create_user_with_families(&dup, &[]),
            Err(ApiError::DuplicateUser)
        ));
    }

    #[test]
    fn duplicate_email_rejected() {
        let store = store();
        store
            .create_user_with_families(&new_user("alice"), &[])
            .unwrap();
        let mut dup = new_user("bob");
        dup.email = "alice@example.com".into();
        assert!(matches!(
            store.create_user_with_families(&dup, &[]),
            Err(ApiError::DuplicateUser)
        ));
    }

    #[test]
    fn signup_with_families_creates_and_joins() {
        let store = store();
        let user = store
            .create_user_with_families(
                &new_user("alice"),
                &["Smiths".into(), "  ".into(), "Jones".into()],
            )
            .unwrap();
        let families = store.list_families_for(&user.id).unwrap();
        let names: Vec<_> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Smiths", "Jones"]);
    }

    #[test]
    fn failed_signup_leaves_no_family_behind() {
        let store = store();
        store
            .create_user_with_families(&new_user("alice"), &[])
            .unwrap();
        // Duplicate username; the transaction must roll back the family too.
        let result = store.create_user_with_families(&new_user("alice"), &["Novak".into()]);
        assert!(result.is_err());
        assert!(store.find_family_by_name("Novak").unwrap().is_none());
    }

    #[test]
    fn find_user_auth_returns_digest() {
        let store = store();
        store
            .create_user_with_families(&new_user("alice"), &[])
            .unwrap();
        let (user, digest) = store.find_user_auth("alice").unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(digest, "salt$hash");
        assert!(store.find_user_auth("ghost").unwrap().is_none());
    }

    #[test]
    fn update_profile_partial() {
        let store = store();
        let user = store
            .create_user_with_families(&new_user("alice"), &[])
            .unwrap();
        let updated = store
            .update_profile(&user.id, Some("Alice Smith"), None)
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Alice Smith"));
        assert!(updated.bio.is_none());

        let updated = store.update_profile(&user.id, None, Some("hello")).unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Alice Smith"));
        assert_eq!(updated.bio.as_deref(), Some("hello"));
    }

    #[test]
    fn update_profile_unknown_user() {
        let store = store();
        assert!(matches!(
            store.update_profile("nope", Some("x"), None),
            Err(ApiError::NotFound("user"))
        ));
    }

    #[test]
    fn delete_user_cascades_memberships() {
        let store = store();
        let user = store
            .create_user_with_families(&new_user("alice"), &["Smiths".into()])
            .unwrap();
        let family = store.find_family_by_name("Smiths").unwrap().unwrap();
        assert!(store.is_member(&user.id, &family.id).unwrap());

        assert!(store.delete_user(&user.id).unwrap());
        assert!(!store.is_member(&user.id, &family.id).unwrap());
        assert!(!store.delete_user(&user.id).unwrap());
    }
}
