//! Authentication and family-scoped session model.
//!
//! Provides:
//! - Signed, expiring bearer tokens carrying the user id plus an optional
//!   active-family claim (stateless — validity is signature + expiry, no
//!   revocation list)
//! - Password hashing (iterated SHA-256, 100k rounds + per-user salt) with
//!   a fixed 72-byte secret truncation policy applied identically at hash
//!   and verify time
//! - Two-stage session resolution: identity first, then the family scope,
//!   with membership re-checked against the store on every request
//!
//! ## Design Decisions
//! - The active family lives in the token rather than a server-side session
//!   table, keeping the resolver stateless and horizontally scalable. The
//!   cost: switching family requires a fresh token, and a revoked membership
//!   is enforced at next-request time, not instantaneously for already
//!   issued tokens (staleness bounded by the token TTL).
//! - No external JWT dependency — tokens are HMAC-SHA256 over a compact
//!   JSON claim set, consistent with the signature verification patterns
//!   used elsewhere in the codebase.

pub mod credential;
pub mod password;
pub mod session;

pub use credential::{Claims, CredentialCodec};
pub use session::{Identity, LoginOutcome, SessionResolver};
