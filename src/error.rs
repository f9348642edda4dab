//! Domain error taxonomy shared by the store, the session resolver, and the
//! HTTP gateway.
//!
//! Every variant is terminal for the current request and maps to a stable
//! discriminator code plus an HTTP status in the gateway. Cross-family reads
//! deliberately surface as `NotFound`, never `Forbidden`, so responses do
//! not confirm the existence of another family's resources.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Login secret mismatch. Returned uniformly whether the username is
    /// unknown or the password is wrong.
    #[error("incorrect username or password")]
    InvalidCredentials,

    /// Bearer token missing, malformed, expired, signature-invalid, or
    /// referencing a user that no longer exists.
    #[error("could not validate credentials")]
    InvalidCredential,

    /// Valid identity, but the token carries no active family and the
    /// endpoint is family-scoped.
    #[error("no family selected")]
    NoFamilySelected,

    /// Valid identity and family, but the caller is not a member of, or not
    /// the owner of, the targeted resource.
    #[error("{0}")]
    Forbidden(&'static str),

    /// Resource does not exist — or exists outside the caller's active
    /// family, which is indistinguishable by design.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("family name '{0}' is already taken")]
    DuplicateFamily(String),

    #[error("username or email already registered")]
    DuplicateUser,

    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl ApiError {
    /// Stable discriminator for API clients. Messages may change; codes
    /// do not.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidCredential => "unauthenticated",
            Self::NoFamilySelected => "no_family_selected",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::DuplicateFamily(_) => "duplicate_family",
            Self::DuplicateUser => "duplicate_user",
            Self::Store(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::InvalidCredentials.code(), "invalid_credentials");
        assert_eq!(ApiError::InvalidCredential.code(), "unauthenticated");
        assert_eq!(ApiError::NoFamilySelected.code(), "no_family_selected");
        assert_eq!(ApiError::Forbidden("nope").code(), "forbidden");
        assert_eq!(ApiError::NotFound("post").code(), "not_found");
        assert_eq!(
            ApiError::DuplicateFamily("Smiths".into()).code(),
            "duplicate_family"
        );
        assert_eq!(ApiError::DuplicateUser.code(), "duplicate_user");
    }

    #[test]
    fn not_found_message_names_resource() {
        assert_eq!(ApiError::NotFound("post").to_string(), "post not found");
    }
}
