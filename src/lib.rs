//! # Custodia (Credential & Audit Core)
//!
//! `custodia` is the security-sensitive core of an incident-tracking
//! application: credential authentication for victim and administrator
//! accounts, plus append-only audit logging of the two sensitive state
//! transitions (perpetrator threat levels, victim account status). GUI,
//! report rendering, and incident CRUD are external collaborators that call
//! in through this library boundary; the crate exposes no wire protocol.
//!
//! ## Credentials
//!
//! Passwords are hashed with **Argon2id** in PHC string format: per-call
//! random salt, self-describing parameters. Hashes from earlier revisions
//! (salted SHA-256 under a `$sha256$` tag) still verify; new ones are never
//! written. Verification fails closed and is constant-time in the mismatch
//! position.
//!
//! ## Authentication
//!
//! [`auth::AuthService`] rejects a missing account and a wrong password with
//! the same `InvalidCredentials` failure so callers cannot enumerate
//! registered emails, and burns a decoy verification on unknown emails so
//! the two paths cost the same. Failure throttling is available as an
//! opt-in policy. Plaintext credentials are never logged; emails appear in
//! logs masked.
//!
//! ## Audit Trail
//!
//! Every threat-level and status change is an immutable log row with actor
//! and server-assigned timestamp. For any subject the entries chain: each
//! old value equals the previous new value, starting from the creation
//! default. [`guard::TransitionGuard`] is the only path that mutates the
//! two guarded fields, and it commits the field update together with its
//! audit entry as one atomic unit with an optimistic concurrency check, so
//! an unaudited mutation cannot exist by construction.
//!
//! ## Sessions
//!
//! [`session::SessionContext`] is an explicit in-process value, not a
//! global and not a cross-process security boundary.

pub mod audit;
pub mod auth;
pub mod guard;
pub mod model;
pub mod password;
pub mod session;
pub mod store;
