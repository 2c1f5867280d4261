/// Group codec: the only boundary between plaintext group values and wire
/// ciphertext.
///
/// Key schedule (all HKDF-SHA256 over the 32-byte master key):
/// - blob key: random-nonce XChaCha20-Poly1305 for attributes
///   (title, avatar, description, timer, invite-link password)
/// - identity key + identity SIV key: deterministic encryption of service ids
/// - profile-key key + profile-key SIV key: deterministic encryption of
///   profile keys, bound to the owner's ACI as associated data
///
/// Attribute blob format: `version (1) || nonce (24) || ciphertext || tag`,
/// where the plaintext is a CBOR `AttributeBlob`.
///
/// Identity decryption never fails. Malformed ciphertext degrades to
/// `ServiceId::UNKNOWN` so one bad entry cannot block a whole member list.
/// When such entries land in a `GroupState` map they collapse into a single
/// `UNKNOWN` key.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{
    decrypt_deterministic, decrypt_message, derive_subkey, encrypt_deterministic,
    encrypt_message, EncryptionError,
};
use crate::groups::change::{
    GroupStateChange, PendingPromotion, PniPromotion, ProfileKeyChange, RequestApproval,
    RoleChange,
};
use crate::groups::ids::{GroupIdentifier, GroupMasterKey, ProfileKey, ServiceId};
use crate::groups::limits::BLOB_VERSION;
use crate::groups::state::{
    AccessControl, AccessRequired, BannedMember, GroupState, Member, PendingMember,
    RequestingMember, Role,
};
use crate::groups::wire::{
    cbor_decode, cbor_encode, WireAccessControl, WireActions, WireBannedMember, WireError,
    WireGroupState, WireMember, WireModifyProfileKey, WireModifyRole, WirePendingMember,
    WirePromotePending, WirePromotePniAci, WirePromoteRequesting, WireRequestingMember,
};

const IDENTITY_AAD: &[u8] = b"ShieldGroups-ServiceId";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Unsupported blob version: {0:#04x}")]
    UnsupportedBlobVersion(u8),

    #[error("Malformed attribute blob")]
    MalformedBlob,

    #[error("Expected a {expected} blob")]
    UnexpectedBlob { expected: &'static str },

    #[error("Unknown {kind} value: {value}")]
    UnknownEnumValue { kind: &'static str, value: u8 },

    #[error("Decrypted profile key has wrong length")]
    InvalidProfileKey,

    #[error("State belongs to a different group")]
    WrongGroup,
}

pub type Result<T> = std::result::Result<T, CodecError>;

// ---------------------------------------------------------------------------
// Key schedule
// ---------------------------------------------------------------------------

/// Per-group secret parameters derived from the master key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GroupSecretParams {
    blob_key: [u8; 32],
    identity_key: [u8; 32],
    identity_siv_key: [u8; 32],
    profile_key_key: [u8; 32],
    profile_key_siv_key: [u8; 32],
    #[zeroize(skip)]
    group_id: GroupIdentifier,
}

impl GroupSecretParams {
    pub fn derive(master_key: &GroupMasterKey) -> Result<Self> {
        let ikm = master_key.as_bytes();
        Ok(GroupSecretParams {
            blob_key: derive_subkey(ikm, b"ShieldGroups-BlobKey-v1")?,
            identity_key: derive_subkey(ikm, b"ShieldGroups-IdentityKey-v1")?,
            identity_siv_key: derive_subkey(ikm, b"ShieldGroups-IdentitySiv-v1")?,
            profile_key_key: derive_subkey(ikm, b"ShieldGroups-ProfileKeyKey-v1")?,
            profile_key_siv_key: derive_subkey(ikm, b"ShieldGroups-ProfileKeySiv-v1")?,
            group_id: master_key.identifier(),
        })
    }

    pub fn group_id(&self) -> GroupIdentifier {
        self.group_id
    }
}

impl std::fmt::Debug for GroupSecretParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupSecretParams({:?})", self.group_id)
    }
}

/// Plaintext of an encrypted attribute.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AttributeBlob {
    Title(String),
    Avatar(String),
    /// Seconds; zero disables.
    DisappearingMessagesDuration(u32),
    Description(String),
    InviteLinkPassword(Vec<u8>),
}

// ---------------------------------------------------------------------------
// GroupCodec
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct GroupCodec {
    params: GroupSecretParams,
}

impl GroupCodec {
    pub fn new(master_key: &GroupMasterKey) -> Result<Self> {
        Ok(GroupCodec {
            params: GroupSecretParams::derive(master_key)?,
        })
    }

    pub fn group_id(&self) -> GroupIdentifier {
        self.params.group_id()
    }

    // ----- attribute blobs -------------------------------------------------

    pub fn encrypt_blob(&self, blob: &AttributeBlob) -> Result<Vec<u8>> {
        let plaintext = cbor_encode(blob)?;
        let sealed = encrypt_message(&plaintext, &self.params.blob_key)?;

        let mut out = Vec::with_capacity(1 + sealed.len());
        out.push(BLOB_VERSION);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt_blob(&self, bytes: &[u8]) -> Result<AttributeBlob> {
        let (version, sealed) = bytes.split_first().ok_or(CodecError::MalformedBlob)?;
        if *version != BLOB_VERSION {
            return Err(CodecError::UnsupportedBlobVersion(*version));
        }
        let plaintext = decrypt_message(sealed, &self.params.blob_key)?;
        cbor_decode(&plaintext).map_err(|_| CodecError::MalformedBlob)
    }

    pub fn encrypt_title(&self, title: &str) -> Result<Vec<u8>> {
        self.encrypt_blob(&AttributeBlob::Title(title.to_string()))
    }

    /// An absent (empty) blob decodes to the empty title.
    pub fn decrypt_title(&self, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Ok(String::new());
        }
        match self.decrypt_blob(bytes)? {
            AttributeBlob::Title(title) => Ok(title),
            _ => Err(CodecError::UnexpectedBlob { expected: "title" }),
        }
    }

    pub fn encrypt_avatar(&self, avatar: &str) -> Result<Vec<u8>> {
        self.encrypt_blob(&AttributeBlob::Avatar(avatar.to_string()))
    }

    pub fn decrypt_avatar(&self, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Ok(String::new());
        }
        match self.decrypt_blob(bytes)? {
            AttributeBlob::Avatar(avatar) => Ok(avatar),
            _ => Err(CodecError::UnexpectedBlob { expected: "avatar" }),
        }
    }

    pub fn encrypt_description(&self, description: &str) -> Result<Vec<u8>> {
        self.encrypt_blob(&AttributeBlob::Description(description.to_string()))
    }

    pub fn decrypt_description(&self, bytes: &[u8]) -> Result<String> {
        if bytes.is_empty() {
            return Ok(String::new());
        }
        match self.decrypt_blob(bytes)? {
            AttributeBlob::Description(description) => Ok(description),
            _ => Err(CodecError::UnexpectedBlob {
                expected: "description",
            }),
        }
    }

    /// Timers travel with second granularity; longer than `u32::MAX` seconds saturates.
    pub fn encrypt_timer(&self, timer: Duration) -> Result<Vec<u8>> {
        let secs = u32::try_from(timer.as_secs()).unwrap_or(u32::MAX);
        self.encrypt_blob(&AttributeBlob::DisappearingMessagesDuration(secs))
    }

    pub fn decrypt_timer(&self, bytes: &[u8]) -> Result<Duration> {
        if bytes.is_empty() {
            return Ok(Duration::ZERO);
        }
        match self.decrypt_blob(bytes)? {
            AttributeBlob::DisappearingMessagesDuration(secs) => {
                Ok(Duration::from_secs(u64::from(secs)))
            }
            _ => Err(CodecError::UnexpectedBlob { expected: "timer" }),
        }
    }

    pub fn encrypt_invite_link_password(&self, password: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_blob(&AttributeBlob::InviteLinkPassword(password.to_vec()))
    }

    pub fn decrypt_invite_link_password(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        match self.decrypt_blob(bytes)? {
            AttributeBlob::InviteLinkPassword(password) => Ok(password),
            _ => Err(CodecError::UnexpectedBlob {
                expected: "invite link password",
            }),
        }
    }

    // ----- identities ------------------------------------------------------

    pub fn encrypt_identity(&self, service_id: &ServiceId) -> Result<Vec<u8>> {
        Ok(encrypt_deterministic(
            &service_id.to_bytes(),
            &self.params.identity_key,
            &self.params.identity_siv_key,
            IDENTITY_AAD,
        )?)
    }

    /// Never fails: anything undecryptable or unparseable is `ServiceId::UNKNOWN`.
    pub fn decrypt_identity(&self, ciphertext: &[u8]) -> ServiceId {
        let plaintext = match decrypt_deterministic(
            ciphertext,
            &self.params.identity_key,
            &self.params.identity_siv_key,
            IDENTITY_AAD,
        ) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                log::warn!("Undecryptable identity ciphertext ({}), using UNKNOWN", e);
                return ServiceId::UNKNOWN;
            }
        };
        match ServiceId::from_bytes(&plaintext) {
            Ok(service_id) => service_id,
            Err(e) => {
                log::warn!("Decrypted identity is not a service id ({}), using UNKNOWN", e);
                ServiceId::UNKNOWN
            }
        }
    }

    /// Decrypt a list of identities, preserving its length and order.
    pub fn decrypt_identities(&self, ciphertexts: &[Vec<u8>]) -> Vec<ServiceId> {
        ciphertexts
            .iter()
            .map(|ct| self.decrypt_identity(ct))
            .collect()
    }

    fn encrypt_identities(&self, ids: &[ServiceId]) -> Result<Vec<Vec<u8>>> {
        ids.iter().map(|id| self.encrypt_identity(id)).collect()
    }

    // ----- profile keys ----------------------------------------------------

    pub fn encrypt_profile_key(&self, profile_key: &ProfileKey, owner: &ServiceId) -> Result<Vec<u8>> {
        Ok(encrypt_deterministic(
            profile_key.as_bytes(),
            &self.params.profile_key_key,
            &self.params.profile_key_siv_key,
            &owner.to_bytes(),
        )?)
    }

    /// Decrypt a profile key bound to `owner`. An `UNKNOWN` owner cannot be
    /// checked against the binding and yields the zeroed key.
    pub fn decrypt_profile_key(&self, ciphertext: &[u8], owner: &ServiceId) -> Result<ProfileKey> {
        if owner.is_unknown() {
            return Ok(ProfileKey::default());
        }
        let plaintext = decrypt_deterministic(
            ciphertext,
            &self.params.profile_key_key,
            &self.params.profile_key_siv_key,
            &owner.to_bytes(),
        )?;
        ProfileKey::from_bytes(&plaintext).ok_or(CodecError::InvalidProfileKey)
    }

    // ----- member records --------------------------------------------------

    pub fn encrypt_member(&self, member: &Member) -> Result<WireMember> {
        Ok(WireMember {
            user_id: self.encrypt_identity(&member.aci)?,
            role: role_to_wire(member.role),
            profile_key: self.encrypt_profile_key(&member.profile_key, &member.aci)?,
            joined_at_revision: member.joined_at_revision,
            pni: member
                .pni
                .as_ref()
                .map(|pni| self.encrypt_identity(pni))
                .transpose()?,
        })
    }

    pub fn decrypt_member(&self, wire: &WireMember) -> Result<Member> {
        let aci = self.decrypt_identity(&wire.user_id);
        let mut member = Member::new(
            aci,
            role_from_wire(wire.role)?,
            self.decrypt_profile_key(&wire.profile_key, &aci)?,
            wire.joined_at_revision,
        );
        member.pni = wire.pni.as_deref().map(|pni| self.decrypt_identity(pni));
        Ok(member)
    }

    pub fn encrypt_pending_member(&self, pending: &PendingMember) -> Result<WirePendingMember> {
        Ok(WirePendingMember {
            service_id: self.encrypt_identity(&pending.service_id)?,
            role: role_to_wire(pending.role),
            added_by: self.encrypt_identity(&pending.invited_by)?,
            timestamp: pending.invited_at,
        })
    }

    pub fn decrypt_pending_member(&self, wire: &WirePendingMember) -> Result<PendingMember> {
        Ok(PendingMember::new(
            self.decrypt_identity(&wire.service_id),
            role_from_wire(wire.role)?,
            self.decrypt_identity(&wire.added_by),
            wire.timestamp,
        ))
    }

    pub fn encrypt_requesting_member(
        &self,
        request: &RequestingMember,
    ) -> Result<WireRequestingMember> {
        Ok(WireRequestingMember {
            user_id: self.encrypt_identity(&request.aci)?,
            profile_key: self.encrypt_profile_key(&request.profile_key, &request.aci)?,
            timestamp: request.requested_at,
        })
    }

    pub fn decrypt_requesting_member(
        &self,
        wire: &WireRequestingMember,
    ) -> Result<RequestingMember> {
        let aci = self.decrypt_identity(&wire.user_id);
        Ok(RequestingMember::new(
            aci,
            self.decrypt_profile_key(&wire.profile_key, &aci)?,
            wire.timestamp,
        ))
    }

    pub fn encrypt_banned_member(&self, banned: &BannedMember) -> Result<WireBannedMember> {
        Ok(WireBannedMember {
            service_id: self.encrypt_identity(&banned.service_id)?,
            timestamp: banned.banned_at,
        })
    }

    pub fn decrypt_banned_member(&self, wire: &WireBannedMember) -> BannedMember {
        BannedMember::new(self.decrypt_identity(&wire.service_id), wire.timestamp)
    }

    // ----- whole changes ---------------------------------------------------

    /// Encrypt a decrypted change into wire actions, entry for entry.
    pub fn encrypt_change(&self, change: &GroupStateChange) -> Result<WireActions> {
        Ok(WireActions {
            source_service_id: change
                .editor
                .as_ref()
                .map(|editor| self.encrypt_identity(editor))
                .transpose()?,
            revision: change.revision,
            add_members: change
                .new_members
                .iter()
                .map(|m| self.encrypt_member(m))
                .collect::<Result<_>>()?,
            delete_members: self.encrypt_identities(&change.delete_members)?,
            modify_member_roles: change
                .modify_member_roles
                .iter()
                .map(|edit| self.encrypt_role_change(edit))
                .collect::<Result<_>>()?,
            modify_member_profile_keys: change
                .modify_profile_keys
                .iter()
                .map(|edit| -> Result<WireModifyProfileKey> {
                    Ok(WireModifyProfileKey {
                        user_id: self.encrypt_identity(&edit.aci)?,
                        profile_key: self.encrypt_profile_key(&edit.profile_key, &edit.aci)?,
                    })
                })
                .collect::<Result<_>>()?,
            add_pending_members: change
                .new_pending_members
                .iter()
                .map(|p| self.encrypt_pending_member(p))
                .collect::<Result<_>>()?,
            delete_pending_members: self.encrypt_identities(&change.delete_pending_members)?,
            promote_pending_members: change
                .promote_pending_members
                .iter()
                .map(|p| -> Result<WirePromotePending> {
                    Ok(WirePromotePending {
                        user_id: self.encrypt_identity(&p.aci)?,
                        profile_key: self.encrypt_profile_key(&p.profile_key, &p.aci)?,
                    })
                })
                .collect::<Result<_>>()?,
            modify_title: change
                .new_title
                .as_deref()
                .map(|t| self.encrypt_title(t))
                .transpose()?,
            modify_avatar: change
                .new_avatar
                .as_deref()
                .map(|a| self.encrypt_avatar(a))
                .transpose()?,
            modify_disappearing_messages_timer: change
                .new_timer
                .map(|t| self.encrypt_timer(t))
                .transpose()?,
            modify_attributes_access: change.new_attribute_access.map(access_to_wire),
            modify_member_access: change.new_member_access.map(access_to_wire),
            modify_add_from_invite_link_access: change.new_invite_link_access.map(access_to_wire),
            add_requesting_members: change
                .new_requesting_members
                .iter()
                .map(|r| self.encrypt_requesting_member(r))
                .collect::<Result<_>>()?,
            delete_requesting_members: self
                .encrypt_identities(&change.delete_requesting_members)?,
            promote_requesting_members: change
                .promote_requesting_members
                .iter()
                .map(|approval| -> Result<WirePromoteRequesting> {
                    Ok(WirePromoteRequesting {
                        user_id: self.encrypt_identity(&approval.aci)?,
                        role: role_to_wire(approval.role),
                    })
                })
                .collect::<Result<_>>()?,
            modify_invite_link_password: change
                .new_invite_link_password
                .as_deref()
                .map(|p| self.encrypt_invite_link_password(p))
                .transpose()?,
            modify_description: change
                .new_description
                .as_deref()
                .map(|d| self.encrypt_description(d))
                .transpose()?,
            modify_announcements_only: change.new_announcements_only,
            add_banned_members: change
                .new_banned_members
                .iter()
                .map(|b| self.encrypt_banned_member(b))
                .collect::<Result<_>>()?,
            delete_banned_members: self.encrypt_identities(&change.delete_banned_members)?,
            promote_pending_pni_aci_members: change
                .promote_pending_pni_aci_members
                .iter()
                .map(|p| -> Result<WirePromotePniAci> {
                    Ok(WirePromotePniAci {
                        user_id: self.encrypt_identity(&p.aci)?,
                        pni: self.encrypt_identity(&p.pni)?,
                        profile_key: self.encrypt_profile_key(&p.profile_key, &p.aci)?,
                    })
                })
                .collect::<Result<_>>()?,
        })
    }

    fn encrypt_role_change(&self, edit: &RoleChange) -> Result<WireModifyRole> {
        Ok(WireModifyRole {
            user_id: self.encrypt_identity(&edit.aci)?,
            role: role_to_wire(edit.role),
        })
    }

    /// Decrypt wire actions into a change, entry for entry. List lengths are
    /// preserved even when identities degrade to `UNKNOWN`.
    pub fn decrypt_actions(&self, actions: &WireActions) -> Result<GroupStateChange> {
        let mut change = GroupStateChange::new(actions.revision);
        change.editor = actions
            .source_service_id
            .as_deref()
            .map(|id| self.decrypt_identity(id));

        change.new_members = actions
            .add_members
            .iter()
            .map(|m| self.decrypt_member(m))
            .collect::<Result<_>>()?;
        change.delete_members = self.decrypt_identities(&actions.delete_members);
        change.modify_member_roles = actions
            .modify_member_roles
            .iter()
            .map(|edit| -> Result<RoleChange> {
                Ok(RoleChange {
                    aci: self.decrypt_identity(&edit.user_id),
                    role: role_from_wire(edit.role)?,
                })
            })
            .collect::<Result<_>>()?;
        change.modify_profile_keys = actions
            .modify_member_profile_keys
            .iter()
            .map(|edit| -> Result<ProfileKeyChange> {
                let aci = self.decrypt_identity(&edit.user_id);
                Ok(ProfileKeyChange {
                    aci,
                    profile_key: self.decrypt_profile_key(&edit.profile_key, &aci)?,
                })
            })
            .collect::<Result<_>>()?;
        change.new_pending_members = actions
            .add_pending_members
            .iter()
            .map(|p| self.decrypt_pending_member(p))
            .collect::<Result<_>>()?;
        change.delete_pending_members = self.decrypt_identities(&actions.delete_pending_members);
        change.promote_pending_members = actions
            .promote_pending_members
            .iter()
            .map(|p| -> Result<PendingPromotion> {
                let aci = self.decrypt_identity(&p.user_id);
                Ok(PendingPromotion {
                    aci,
                    profile_key: self.decrypt_profile_key(&p.profile_key, &aci)?,
                })
            })
            .collect::<Result<_>>()?;

        change.new_title = actions
            .modify_title
            .as_deref()
            .map(|t| self.decrypt_title(t))
            .transpose()?;
        change.new_avatar = actions
            .modify_avatar
            .as_deref()
            .map(|a| self.decrypt_avatar(a))
            .transpose()?;
        change.new_timer = actions
            .modify_disappearing_messages_timer
            .as_deref()
            .map(|t| self.decrypt_timer(t))
            .transpose()?;
        change.new_attribute_access = actions
            .modify_attributes_access
            .map(access_from_wire)
            .transpose()?;
        change.new_member_access = actions
            .modify_member_access
            .map(access_from_wire)
            .transpose()?;
        change.new_invite_link_access = actions
            .modify_add_from_invite_link_access
            .map(access_from_wire)
            .transpose()?;

        change.new_requesting_members = actions
            .add_requesting_members
            .iter()
            .map(|r| self.decrypt_requesting_member(r))
            .collect::<Result<_>>()?;
        change.delete_requesting_members =
            self.decrypt_identities(&actions.delete_requesting_members);
        change.promote_requesting_members = actions
            .promote_requesting_members
            .iter()
            .map(|approval| -> Result<RequestApproval> {
                Ok(RequestApproval {
                    aci: self.decrypt_identity(&approval.user_id),
                    role: role_from_wire(approval.role)?,
                })
            })
            .collect::<Result<_>>()?;

        change.new_invite_link_password = actions
            .modify_invite_link_password
            .as_deref()
            .map(|p| self.decrypt_invite_link_password(p))
            .transpose()?;
        change.new_description = actions
            .modify_description
            .as_deref()
            .map(|d| self.decrypt_description(d))
            .transpose()?;
        change.new_announcements_only = actions.modify_announcements_only;

        change.new_banned_members = actions
            .add_banned_members
            .iter()
            .map(|b| self.decrypt_banned_member(b))
            .collect();
        change.delete_banned_members = self.decrypt_identities(&actions.delete_banned_members);
        change.promote_pending_pni_aci_members = actions
            .promote_pending_pni_aci_members
            .iter()
            .map(|p| -> Result<PniPromotion> {
                let aci = self.decrypt_identity(&p.user_id);
                Ok(PniPromotion {
                    aci,
                    pni: self.decrypt_identity(&p.pni),
                    profile_key: self.decrypt_profile_key(&p.profile_key, &aci)?,
                })
            })
            .collect::<Result<_>>()?;

        Ok(change)
    }

    // ----- whole states ----------------------------------------------------

    pub fn encrypt_state(&self, state: &GroupState) -> Result<WireGroupState> {
        Ok(WireGroupState {
            group_id: self.group_id().as_bytes().to_vec(),
            title: self.encrypt_title(&state.title)?,
            avatar: self.encrypt_avatar(&state.avatar)?,
            disappearing_messages_timer: self.encrypt_timer(state.disappearing_messages_timer)?,
            access_control: WireAccessControl {
                attributes: access_to_wire(state.access_control.attributes),
                members: access_to_wire(state.access_control.members),
                add_from_invite_link: access_to_wire(state.access_control.add_from_invite_link),
            },
            revision: state.revision,
            members: state
                .members
                .values()
                .map(|m| self.encrypt_member(m))
                .collect::<Result<_>>()?,
            pending_members: state
                .pending_members
                .values()
                .map(|p| self.encrypt_pending_member(p))
                .collect::<Result<_>>()?,
            requesting_members: state
                .requesting_members
                .values()
                .map(|r| self.encrypt_requesting_member(r))
                .collect::<Result<_>>()?,
            invite_link_password: self.encrypt_invite_link_password(&state.invite_link_password)?,
            description: self.encrypt_description(&state.description)?,
            announcements_only: state.announcements_only,
            banned_members: state
                .banned_members
                .values()
                .map(|b| self.encrypt_banned_member(b))
                .collect::<Result<_>>()?,
        })
    }

    pub fn decrypt_state(&self, wire: &WireGroupState) -> Result<GroupState> {
        if wire.group_id.as_slice() != self.group_id().as_bytes().as_slice() {
            return Err(CodecError::WrongGroup);
        }

        let mut state = GroupState::new(wire.revision);
        state.title = self.decrypt_title(&wire.title)?;
        state.avatar = self.decrypt_avatar(&wire.avatar)?;
        state.description = self.decrypt_description(&wire.description)?;
        state.disappearing_messages_timer = self.decrypt_timer(&wire.disappearing_messages_timer)?;
        state.access_control = AccessControl {
            attributes: access_from_wire(wire.access_control.attributes)?,
            members: access_from_wire(wire.access_control.members)?,
            add_from_invite_link: access_from_wire(wire.access_control.add_from_invite_link)?,
        };
        state.announcements_only = wire.announcements_only;
        state.invite_link_password = self.decrypt_invite_link_password(&wire.invite_link_password)?;

        for wire_member in &wire.members {
            let member = self.decrypt_member(wire_member)?;
            state.members.insert(member.aci, member);
        }
        for wire_pending in &wire.pending_members {
            let pending = self.decrypt_pending_member(wire_pending)?;
            state.pending_members.insert(pending.service_id, pending);
        }
        for wire_request in &wire.requesting_members {
            let request = self.decrypt_requesting_member(wire_request)?;
            state.requesting_members.insert(request.aci, request);
        }
        for wire_banned in &wire.banned_members {
            let banned = self.decrypt_banned_member(wire_banned);
            state.banned_members.insert(banned.service_id, banned);
        }

        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Enum mapping
// ---------------------------------------------------------------------------

pub fn role_to_wire(role: Role) -> u8 {
    role as u8
}

pub fn role_from_wire(value: u8) -> Result<Role> {
    match value {
        1 => Ok(Role::Default),
        2 => Ok(Role::Administrator),
        _ => Err(CodecError::UnknownEnumValue { kind: "role", value }),
    }
}

pub fn access_to_wire(access: AccessRequired) -> u8 {
    access as u8
}

pub fn access_from_wire(value: u8) -> Result<AccessRequired> {
    match value {
        1 => Ok(AccessRequired::Any),
        2 => Ok(AccessRequired::Member),
        3 => Ok(AccessRequired::Administrator),
        4 => Ok(AccessRequired::Unsatisfiable),
        _ => Err(CodecError::UnknownEnumValue {
            kind: "access",
            value,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
