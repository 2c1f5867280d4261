// Crate-level lint configuration: stylistic lints that don't affect correctness.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments,
    clippy::type_complexity
)]

//! Shield Groups: encrypted, revisioned group state for Shield Protocol.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `crypto` | XChaCha20-Poly1305 (random and synthetic nonces), HKDF, Ed25519 change signatures |
//! | `groups` | Group state, changes, apply/reconstruct/resolve, wire codec, operations facade |

pub mod crypto;
pub mod groups;

// ── Re-export main types ───────────────────────────────────────────────────
pub use groups::{
    apply, reconstruct, resolve_conflict, GroupCodec, GroupMasterKey, GroupOperations,
    GroupState, GroupStateChange, GroupsConfig, Member, ProfileKey, Role, ServiceId,
};

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version
pub fn get_version() -> &'static str {
    VERSION
}
