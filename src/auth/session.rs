//! Two-stage session resolution: who is calling, and which family scope
//! their request runs under.
//!
//! Stage one decodes the bearer token and confirms the subject still exists.
//! Stage two takes the token's family claim and re-checks membership against
//! the store, so a token minted before a membership was revoked stops
//! granting family access on its next use.

use crate::auth::credential::{Claims, CredentialCodec};
use crate::auth::password;
use crate::error::ApiError;
use crate::store::{Family, FeedStore, User};
use std::sync::Arc;

/// A verified caller: the live user row plus the raw claims.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
    pub claims: Claims,
}

/// Everything a successful login returns.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub user: User,
    pub families: Vec<Family>,
    /// Family the token was scoped to, when the user has any membership.
    pub selected: Option<Family>,
}

/// Resolves bearer tokens into identities and family scopes.
pub struct SessionResolver {
    store: Arc<FeedStore>,
    codec: CredentialCodec,
}

impl SessionResolver {
    pub fn new(store: Arc<FeedStore>, codec: CredentialCodec) -> Self {
        Self { store, codec }
    }

    /// Verify username + password and mint a token.
    ///
    /// Unknown username and wrong password both report `InvalidCredentials`,
    /// and the unknown-username path burns a dummy hash so its timing matches
    /// the wrong-password path.
    ///
    /// `family`, when given (id or name), must refer to a family the user
    /// belongs to; otherwise the first-joined membership is selected, or
    /// none when the user has no memberships yet.
    pub fn login(
        &self,
        username: &str,
        secret: &str,
        family: Option<&str>,
    ) -> Result<LoginOutcome, ApiError> {
        let Some((user, digest)) = self.store.find_user_auth(username)? else {
            password::dummy_verify(secret);
            return Err(ApiError::InvalidCredentials);
        };
        if !password::verify_secret(secret, &digest) {
            return Err(ApiError::InvalidCredentials);
        }

        let families = self.store.list_families_for(&user.id)?;
        let selected = match family {
            Some(wanted) => {
                let family = families
                    .iter()
                    .find(|f| f.id == wanted || f.name.eq_ignore_ascii_case(wanted))
                    .cloned()
                    .ok_or(ApiError::Forbidden("not a member of the requested family"))?;
                Some(family)
            }
            None => families.first().cloned(),
        };

        let token = self
            .codec
            .issue(&user.id, selected.as_ref().map(|f| f.id.as_str()));
        tracing::info!(username = user.username, "User logged in");
        Ok(LoginOutcome {
            token,
            user,
            families,
            selected,
        })
    }

    /// Stage one: token to live user. A valid signature over a since-deleted
    /// user reads as an invalid credential.
    pub fn resolve_identity(&self, token: &str) -> Result<Identity, ApiError> {
        let claims = self.codec.decode(token)?;
        let user = self
            .store
            .get_user(&claims.sub)?
            .ok_or(ApiError::InvalidCredential)?;
        Ok(Identity { user, claims })
    }

    /// Stage two: the family scope a request runs under. Membership is
    /// re-checked on every call, never trusted from the claim alone.
    pub fn resolve_family_scope(&self, identity: &Identity) -> Result<String, ApiError> {
        let family_id = identity
            .claims
            .fam
            .as_deref()
            .ok_or(ApiError::NoFamilySelected)?;
        if !self.store.is_member(&identity.user.id, family_id)? {
            return Err(ApiError::Forbidden("no longer a member of this family"));
        }
        Ok(family_id.to_owned())
    }

    /// Re-scope an existing session to another of the caller's families,
    /// returning a fresh token. The old token stays valid until expiry.
    pub fn select_family(&self, identity: &Identity, family_id: &str) -> Result<String, ApiError> {
        if !self.store.is_member(&identity.user.id, family_id)? {
            return Err(ApiError::Forbidden("not a member of this family"));
        }
        Ok(self.codec.issue(&identity.user.id, Some(family_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::users::NewUser;

    fn resolver() -> SessionResolver {
        let store = Arc::new(FeedStore::open_in_memory().unwrap());
        SessionResolver::new(store, CredentialCodec::new("test-secret", 1800))
    }

    fn signup(resolver: &SessionResolver, username: &str, families: &[&str]) -> User {
        let names: Vec<String> = families.iter().map(|s| s.to_string()).collect();
        resolver
            .store
            .create_user_with_families(
                &NewUser {
                    username: username.into(),
                    email: format!("{username}@example.com"),
                    password_hash: password::hash_secret("hunter2!"),
                    full_name: None,
                    bio: None,
                },
                &names,
            )
            .unwrap()
    }

    #[test]
    fn login_unknown_and_wrong_password_look_alike() {
        let resolver = resolver();
        signup(&resolver, "alice", &[]);

        let unknown = resolver.login("ghost", "hunter2!", None);
        let wrong = resolver.login("alice", "not-the-password", None);
        assert!(matches!(unknown, Err(ApiError::InvalidCredentials)));
        assert!(matches!(wrong, Err(ApiError::InvalidCredentials)));
    }

    #[test]
    fn login_auto_selects_first_family() {
        let resolver = resolver();
        signup(&resolver, "alice", &["Smiths", "Jones"]);

        let outcome = resolver.login("alice", "hunter2!", None).unwrap();
        assert_eq!(outcome.families.len(), 2);
        assert_eq!(outcome.selected.as_ref().unwrap().name, "Smiths");

        let identity = resolver.resolve_identity(&outcome.token).unwrap();
        let scope = resolver.resolve_family_scope(&identity).unwrap();
        assert_eq!(scope, outcome.selected.unwrap().id);
    }

    #[test]
    fn login_with_no_memberships_yields_unscoped_token() {
        let resolver = resolver();
        signup(&resolver, "alice", &[]);

        let outcome = resolver.login("alice", "hunter2!", None).unwrap();
        assert!(outcome.selected.is_none());

        let identity = resolver.resolve_identity(&outcome.token).unwrap();
        assert!(matches!(
            resolver.resolve_family_scope(&identity),
            Err(ApiError::NoFamilySelected)
        ));
    }

    #[test]
    fn login_with_requested_family() {
        let resolver = resolver();
        signup(&resolver, "alice", &["Smiths", "Jones"]);

        let outcome = resolver
            .login("alice", "hunter2!", Some("jones"))
            .unwrap();
        assert_eq!(outcome.selected.as_ref().unwrap().name, "Jones");

        // The hint may also be a family id.
        let jones_id = outcome.selected.unwrap().id;
        let outcome = resolver
            .login("alice", "hunter2!", Some(&jones_id))
            .unwrap();
        assert_eq!(outcome.selected.unwrap().id, jones_id);

        assert!(matches!(
            resolver.login("alice", "hunter2!", Some("Strangers")),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn select_family_requires_membership() {
        let resolver = resolver();
        signup(&resolver, "alice", &["Smiths"]);
        let other = resolver.store.create_family("Jones").unwrap();

        let outcome = resolver.login("alice", "hunter2!", None).unwrap();
        let identity = resolver.resolve_identity(&outcome.token).unwrap();

        assert!(matches!(
            resolver.select_family(&identity, &other.id),
            Err(ApiError::Forbidden(_))
        ));

        resolver.store.join(&identity.user.id, &other.id).unwrap();
        let token = resolver.select_family(&identity, &other.id).unwrap();
        let rescoped = resolver.resolve_identity(&token).unwrap();
        assert_eq!(rescoped.claims.fam.as_deref(), Some(other.id.as_str()));
    }

    #[test]
    fn stale_family_claim_is_rejected_per_request() {
        let resolver = resolver();
        signup(&resolver, "alice", &["Smiths"]);

        let outcome = resolver.login("alice", "hunter2!", None).unwrap();
        let identity = resolver.resolve_identity(&outcome.token).unwrap();
        resolver.resolve_family_scope(&identity).unwrap();

        // Family dissolves while the token is still unexpired.
        let family_id = outcome.selected.unwrap().id;
        resolver.store.delete_family(&family_id).unwrap();

        let identity = resolver.resolve_identity(&outcome.token).unwrap();
        assert!(matches!(
            resolver.resolve_family_scope(&identity),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn deleted_user_token_is_invalid() {
        let resolver = resolver();
        let user = signup(&resolver, "alice", &[]);
        let outcome = resolver.login("alice", "hunter2!", None).unwrap();

        resolver.store.delete_user(&user.id).unwrap();
        assert!(matches!(
            resolver.resolve_identity(&outcome.token),
            Err(ApiError::InvalidCredential)
        ));
    }
}
