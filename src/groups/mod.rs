pub mod apply;
/// Encrypted group state engine: revisioned snapshots, sparse changes, and
/// the server wire form between them.
///
/// A group is a sequence of `GroupState` snapshots. Each revision is reached
/// by applying one `GroupStateChange`. The server only ever sees ciphertext:
/// identities and profile keys are deterministically encrypted, attributes
/// travel as versioned blobs, and the codec is the only place plaintext and
/// wire meet.
///
/// # Module structure
/// - `ids` : ServiceId, ProfileKey, GroupMasterKey, GroupIdentifier
/// - `state` : GroupState and its member collections
/// - `change` : GroupStateChange, the decrypted delta
/// - `apply` : the transition function
/// - `reconstruct` : the left inverse of apply (diff two snapshots)
/// - `resolve` : trims a stale change against the latest state
/// - `wire` : CBOR wire messages with fail-closed unknown-field detection
/// - `codec` : encryption and decryption between plaintext and wire
/// - `operations` : the facade the application layer calls
/// - `config`, `limits` : runtime configuration and protocol constants
pub mod change;
pub mod codec;
pub mod config;
pub mod ids;
pub mod limits;
pub mod operations;
pub mod reconstruct;
pub mod resolve;
pub mod state;
pub mod wire;

#[cfg(test)]
mod proptests;

// Re-export core types for convenience
pub use apply::{apply, apply_next, ApplyError};
pub use change::{
    GroupStateChange, PendingPromotion, PniPromotion, ProfileKeyChange, RequestApproval,
    RoleChange,
};
pub use codec::{AttributeBlob, CodecError, GroupCodec, GroupSecretParams};
pub use config::{ConfigError, GroupsConfig};
pub use ids::{GroupIdentifier, GroupMasterKey, IdentityError, ProfileKey, ServiceId};
pub use operations::{
    ChangeVerification, GroupOperations, MemberCandidate, OperationsError, OutboundChange,
};
pub use reconstruct::reconstruct;
pub use resolve::{
    ban_evictions, resolve_conflict, resolve_conflict_with_actions, ChangeSetModifier,
    ConflictError,
};
pub use state::{
    AccessControl, AccessRequired, BannedMember, GroupState, Member, Membership, PendingMember,
    RequestingMember, Role,
};
pub use wire::{
    cbor_decode, cbor_encode, WireActions, WireError, WireGroupChange, WireGroupState,
    WireMessage,
};
