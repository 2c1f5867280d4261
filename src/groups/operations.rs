/// Operations facade: what the application layer calls.
///
/// Outbound, each user intent becomes a candidate `GroupStateChange`, is
/// encrypted into `WireActions`, and both are trimmed together against the
/// latest cached state. The result targets `state.revision + 1` and names the
/// local account as editor. If the server rejects it because someone else got
/// there first, the caller re-fetches and builds again from the new state.
///
/// Inbound, `decrypt_change` and `decrypt_state` turn server payloads into
/// plaintext values for the state applier.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::crypto::{random_bytes, verify_change_signature, SigningError};
use crate::groups::change::{
    GroupStateChange, PendingPromotion, PniPromotion, ProfileKeyChange, RequestApproval,
    RoleChange,
};
use crate::groups::codec::{CodecError, GroupCodec};
use crate::groups::config::{ConfigError, GroupsConfig};
use crate::groups::ids::{GroupIdentifier, GroupMasterKey, ProfileKey, ServiceId};
use crate::groups::resolve::{resolve_conflict_with_actions, ConflictError};
use crate::groups::state::{
    AccessRequired, BannedMember, GroupState, Member, PendingMember, RequestingMember, Role,
};
use crate::groups::wire::{
    peek_change_epoch, WireActions, WireError, WireGroupChange, WireGroupState, WireMessage,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum OperationsError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Conflict resolution error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Server signature does not verify")]
    InvalidServerSignature,

    #[error("Expected an ACI, got {0:?}")]
    NotAnAci(ServiceId),

    #[error("Not a member of this group")]
    NotInGroup,

    #[error("Last administrator must name a successor before leaving")]
    LastAdministrator,

    #[error("Successor is not a member: {0:?}")]
    SuccessorNotMember(ServiceId),
}

pub type Result<T> = std::result::Result<T, OperationsError>;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// How far to trust an inbound change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeVerification {
    /// Fetched over an authenticated channel; no signature check.
    AlreadyTrusted,
    /// Check the server's Ed25519 signature over the actions first.
    VerifyServerSignature([u8; 32]),
}

/// Someone to add. With a profile key and an ACI they join directly;
/// otherwise they are invited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberCandidate {
    pub service_id: ServiceId,
    pub profile_key: Option<ProfileKey>,
}

impl MemberCandidate {
    pub fn with_profile_key(aci: ServiceId, profile_key: ProfileKey) -> Self {
        MemberCandidate {
            service_id: aci,
            profile_key: Some(profile_key),
        }
    }

    pub fn invite(service_id: ServiceId) -> Self {
        MemberCandidate {
            service_id,
            profile_key: None,
        }
    }
}

/// A resolved change ready to submit: the plaintext view and the wire
/// actions, entry for entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundChange {
    pub change: GroupStateChange,
    pub actions: WireActions,
}

impl OutboundChange {
    /// Nothing left to send once resolved.
    pub fn is_empty(&self) -> bool {
        self.change.is_empty()
    }

    /// CBOR bytes of the wire actions.
    pub fn encode(&self) -> std::result::Result<Vec<u8>, WireError> {
        self.actions.encode()
    }
}

// ---------------------------------------------------------------------------
// GroupOperations
// ---------------------------------------------------------------------------

pub struct GroupOperations {
    codec: GroupCodec,
    self_aci: ServiceId,
    config: GroupsConfig,
}

impl GroupOperations {
    pub fn new(master_key: &GroupMasterKey, self_aci: ServiceId, config: GroupsConfig) -> Result<Self> {
        config.validate()?;
        if !self_aci.is_aci() || self_aci.is_unknown() {
            return Err(OperationsError::NotAnAci(self_aci));
        }
        Ok(GroupOperations {
            codec: GroupCodec::new(master_key)?,
            self_aci,
            config,
        })
    }

    pub fn group_id(&self) -> GroupIdentifier {
        self.codec.group_id()
    }

    pub fn self_aci(&self) -> ServiceId {
        self.self_aci
    }

    pub fn codec(&self) -> &GroupCodec {
        &self.codec
    }

    pub fn config(&self) -> &GroupsConfig {
        &self.config
    }

    // ----- attributes ------------------------------------------------------

    pub fn modify_title(&self, state: &GroupState, title: &str) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_title = Some(title.to_string());
        self.finish(state, change)
    }

    pub fn modify_description(&self, state: &GroupState, description: &str) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_description = Some(description.to_string());
        self.finish(state, change)
    }

    pub fn modify_avatar(&self, state: &GroupState, avatar: &str) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_avatar = Some(avatar.to_string());
        self.finish(state, change)
    }

    pub fn modify_disappearing_messages_timer(
        &self,
        state: &GroupState,
        timer: Duration,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_timer = Some(timer);
        self.finish(state, change)
    }

    pub fn modify_attributes_access(
        &self,
        state: &GroupState,
        access: AccessRequired,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_attribute_access = Some(access);
        self.finish(state, change)
    }

    pub fn modify_members_access(
        &self,
        state: &GroupState,
        access: AccessRequired,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_member_access = Some(access);
        self.finish(state, change)
    }

    pub fn modify_invite_link_access(
        &self,
        state: &GroupState,
        access: AccessRequired,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_invite_link_access = Some(access);
        self.finish(state, change)
    }

    pub fn modify_announcements_only(
        &self,
        state: &GroupState,
        announcements_only: bool,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_announcements_only = Some(announcements_only);
        self.finish(state, change)
    }

    // ----- membership ------------------------------------------------------

    /// Add or invite. Banned candidates are unbanned in the same change.
    pub fn add_members(
        &self,
        state: &GroupState,
        candidates: &[MemberCandidate],
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        let now = now_ms();
        for candidate in candidates {
            let id = candidate.service_id;
            match candidate.profile_key {
                Some(profile_key) if id.is_aci() => change
                    .new_members
                    .push(Member::new(id, Role::Default, profile_key, change.revision)),
                _ => change.new_pending_members.push(PendingMember::new(
                    id,
                    Role::Default,
                    self.self_aci,
                    now,
                )),
            }
            if state.is_banned(&id) {
                change.delete_banned_members.push(id);
            }
        }
        self.finish(state, change)
    }

    pub fn remove_members(&self, state: &GroupState, acis: &[ServiceId]) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.delete_members.extend_from_slice(acis);
        self.finish(state, change)
    }

    pub fn revoke_invitations(
        &self,
        state: &GroupState,
        service_ids: &[ServiceId],
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.delete_pending_members.extend_from_slice(service_ids);
        self.finish(state, change)
    }

    pub fn change_role(&self, state: &GroupState, aci: ServiceId, role: Role) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.modify_member_roles.push(RoleChange { aci, role });
        self.finish(state, change)
    }

    /// Publish the local account's new profile key to the group.
    pub fn update_profile_key(
        &self,
        state: &GroupState,
        profile_key: ProfileKey,
    ) -> Result<OutboundChange> {
        if !state.is_member(&self.self_aci) {
            return Err(OperationsError::NotInGroup);
        }
        let mut change = self.draft(state);
        change.modify_profile_keys.push(ProfileKeyChange {
            aci: self.self_aci,
            profile_key,
        });
        self.finish(state, change)
    }

    /// Accept an invitation addressed to the local ACI.
    pub fn accept_invitation(
        &self,
        state: &GroupState,
        profile_key: ProfileKey,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.promote_pending_members.push(PendingPromotion {
            aci: self.self_aci,
            profile_key,
        });
        self.finish(state, change)
    }

    /// Accept an invitation addressed to the local PNI, joining under the ACI.
    pub fn accept_pni_invitation(
        &self,
        state: &GroupState,
        pni: ServiceId,
        profile_key: ProfileKey,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.promote_pending_pni_aci_members.push(PniPromotion {
            aci: self.self_aci,
            pni,
            profile_key,
        });
        self.finish(state, change)
    }

    /// Ask to join through the invite link.
    pub fn request_to_join(
        &self,
        state: &GroupState,
        profile_key: ProfileKey,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change
            .new_requesting_members
            .push(RequestingMember::new(self.self_aci, profile_key, now_ms()));
        self.finish(state, change)
    }

    pub fn approve_join_requests(
        &self,
        state: &GroupState,
        acis: &[ServiceId],
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change
            .promote_requesting_members
            .extend(acis.iter().map(|aci| RequestApproval {
                aci: *aci,
                role: Role::Default,
            }));
        self.finish(state, change)
    }

    /// Reject join requests, optionally banning the requesters too.
    pub fn deny_join_requests(
        &self,
        state: &GroupState,
        acis: &[ServiceId],
        ban: bool,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.delete_requesting_members.extend_from_slice(acis);
        if ban {
            let now = now_ms();
            change
                .new_banned_members
                .extend(acis.iter().map(|aci| BannedMember::new(*aci, now)));
        }
        self.finish(state, change)
    }

    /// Ban, removing the identities from whatever collection they are in.
    pub fn ban_members(
        &self,
        state: &GroupState,
        service_ids: &[ServiceId],
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        let now = now_ms();
        for id in service_ids {
            if state.is_member(id) {
                change.delete_members.push(*id);
            }
            if state.is_pending(id) {
                change.delete_pending_members.push(*id);
            }
            if state.is_requesting(id) {
                change.delete_requesting_members.push(*id);
            }
            change.new_banned_members.push(BannedMember::new(*id, now));
        }
        self.finish(state, change)
    }

    pub fn unban_members(
        &self,
        state: &GroupState,
        service_ids: &[ServiceId],
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.delete_banned_members.extend_from_slice(service_ids);
        self.finish(state, change)
    }

    /// Fresh random invite-link password; old links stop working.
    pub fn rotate_invite_link(&self, state: &GroupState) -> Result<OutboundChange> {
        let password = random_bytes(self.config.invite_link_password_len);
        self.set_invite_link_password(state, password)
    }

    pub fn set_invite_link_password(
        &self,
        state: &GroupState,
        password: Vec<u8>,
    ) -> Result<OutboundChange> {
        let mut change = self.draft(state);
        change.new_invite_link_password = Some(password);
        self.finish(state, change)
    }

    /// Leave the group, or decline an invite / withdraw a join request.
    ///
    /// The last administrator of a group with other members must hand the
    /// role to at least one `successor`.
    pub fn leave_group(&self, state: &GroupState, successors: &[ServiceId]) -> Result<OutboundChange> {
        let me = self.self_aci;
        let mut change = self.draft(state);

        if state.is_member(&me) {
            if let Some(stranger) = successors.iter().find(|s| **s != me && !state.is_member(s)) {
                return Err(OperationsError::SuccessorNotMember(*stranger));
            }
            let other_admins = state.admins().filter(|m| m.aci != me).count();
            let others = state.member_count() - 1;
            if state.is_admin(&me) && other_admins == 0 && others > 0 && successors.is_empty() {
                return Err(OperationsError::LastAdministrator);
            }
            change.delete_members.push(me);
            change
                .modify_member_roles
                .extend(successors.iter().filter(|s| **s != me).map(|s| RoleChange {
                    aci: *s,
                    role: Role::Administrator,
                }));
        } else if state.is_pending(&me) {
            change.delete_pending_members.push(me);
        } else if state.is_requesting(&me) {
            change.delete_requesting_members.push(me);
        } else {
            return Err(OperationsError::NotInGroup);
        }

        self.finish(state, change)
    }

    // ----- inbound ---------------------------------------------------------

    /// Decrypt a server-delivered change.
    ///
    /// Returns `Ok(None)` for a change written for a later protocol epoch than
    /// this build understands; the caller should prompt for an update.
    pub fn decrypt_change(
        &self,
        wire: &WireGroupChange,
        verification: ChangeVerification,
    ) -> Result<Option<GroupStateChange>> {
        if self.is_future_epoch(wire.change_epoch) {
            return Ok(None);
        }

        if let ChangeVerification::VerifyServerSignature(public_key) = verification {
            if !verify_change_signature(&wire.actions, &wire.server_signature, &public_key)? {
                return Err(OperationsError::InvalidServerSignature);
            }
        }

        let actions = WireActions::decode(&wire.actions)?;
        let change = self.codec.decrypt_actions(&actions)?;
        log::debug!(
            "Decrypted group change to revision {} ({} actions)",
            change.revision,
            change.action_count()
        );
        Ok(Some(change))
    }

    /// As [`decrypt_change`](Self::decrypt_change), from encoded bytes.
    ///
    /// The epoch gate runs before fail-closed decoding: a future envelope may
    /// carry fields this build does not know and is `Ok(None)`, not an error.
    pub fn decrypt_change_bytes(
        &self,
        bytes: &[u8],
        verification: ChangeVerification,
    ) -> Result<Option<GroupStateChange>> {
        if let Some(epoch) = peek_change_epoch(bytes)? {
            if self.is_future_epoch(epoch) {
                return Ok(None);
            }
        }
        let wire = WireGroupChange::decode(bytes)?;
        self.decrypt_change(&wire, verification)
    }

    pub fn decrypt_state(&self, wire: &WireGroupState) -> Result<GroupState> {
        Ok(self.codec.decrypt_state(wire)?)
    }

    pub fn decrypt_state_bytes(&self, bytes: &[u8]) -> Result<GroupState> {
        let wire = WireGroupState::decode(bytes)?;
        self.decrypt_state(&wire)
    }

    /// Encrypt a full state, e.g. the initial state of a new group.
    pub fn encrypt_state(&self, state: &GroupState) -> Result<WireGroupState> {
        Ok(self.codec.encrypt_state(state)?)
    }

    // ----- internals -------------------------------------------------------

    fn is_future_epoch(&self, epoch: u32) -> bool {
        let future = epoch > self.config.highest_known_epoch;
        if future {
            log::warn!(
                "Ignoring group change from epoch {} (highest known {})",
                epoch,
                self.config.highest_known_epoch
            );
        }
        future
    }

    fn draft(&self, state: &GroupState) -> GroupStateChange {
        GroupStateChange::new(state.revision.wrapping_add(1)).with_editor(self.self_aci)
    }

    fn finish(&self, state: &GroupState, change: GroupStateChange) -> Result<OutboundChange> {
        let actions = self.codec.encrypt_change(&change)?;
        let (change, actions) = resolve_conflict_with_actions(
            state,
            &change,
            &actions,
            &self.codec,
            self.config.banned_member_capacity,
        )?;
        if change.is_empty() {
            log::debug!("Change to revision {} resolved to nothing", change.revision);
        }
        Ok(OutboundChange { change, actions })
    }
}

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_keypair, sign_change};
    use crate::groups::apply::apply_next;
    use crate::groups::limits::HIGHEST_KNOWN_EPOCH;

    struct Setup {
        master: GroupMasterKey,
        admin: ServiceId,
        ops: GroupOperations,
        state: GroupState,
    }

    fn setup() -> Setup {
        let master = GroupMasterKey::generate();
        let admin = ServiceId::random_aci();
        let ops = GroupOperations::new(&master, admin, GroupsConfig::default()).unwrap();
        let mut state = GroupState::new(1);
        state.title = "Family".into();
        state.members.insert(
            admin,
            Member::new(admin, Role::Administrator, ProfileKey::generate(), 0),
        );
        Setup {
            master,
            admin,
            ops,
            state,
        }
    }

    fn ops_for(master: &GroupMasterKey, aci: ServiceId) -> GroupOperations {
        GroupOperations::new(master, aci, GroupsConfig::default()).unwrap()
    }

    #[test]
    fn test_new_rejects_pni_and_bad_config() {
        let master = GroupMasterKey::generate();
        assert!(matches!(
            GroupOperations::new(&master, ServiceId::random_pni(), GroupsConfig::default()),
            Err(OperationsError::NotAnAci(_))
        ));
        let config = GroupsConfig {
            banned_member_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            GroupOperations::new(&master, ServiceId::random_aci(), config),
            Err(OperationsError::Config(ConfigError::ZeroBanCapacity))
        ));
    }

    #[test]
    fn test_modify_title_targets_next_revision() {
        let s = setup();
        let out = s.ops.modify_title(&s.state, "Family (2026)").unwrap();
        assert_eq!(out.change.revision, 2);
        assert_eq!(out.change.editor, Some(s.admin));
        assert_eq!(out.change.new_title.as_deref(), Some("Family (2026)"));

        let next = apply_next(&s.state, &out.change).unwrap();
        assert_eq!(next.title, "Family (2026)");

        // Same title again resolves to nothing.
        let again = s.ops.modify_title(&next, "Family (2026)").unwrap();
        assert!(again.is_empty());
        assert!(again.actions.modify_title.is_none());
    }

    #[test]
    fn test_add_members_splits_direct_and_invite() {
        let s = setup();
        let direct = ServiceId::random_aci();
        let invited = ServiceId::random_pni();
        let out = s
            .ops
            .add_members(
                &s.state,
                &[
                    MemberCandidate::with_profile_key(direct, ProfileKey::generate()),
                    MemberCandidate::invite(invited),
                ],
            )
            .unwrap();
        assert_eq!(out.change.new_members.len(), 1);
        assert_eq!(out.change.new_pending_members.len(), 1);
        assert_eq!(out.change.new_pending_members[0].invited_by, s.admin);

        let next = apply_next(&s.state, &out.change).unwrap();
        assert!(next.is_member(&direct));
        assert!(next.is_pending(&invited));
    }

    #[test]
    fn test_add_banned_candidate_unbans() {
        let mut s = setup();
        let target = ServiceId::random_pni();
        s.state
            .banned_members
            .insert(target, BannedMember::new(target, 5));
        let out = s
            .ops
            .add_members(&s.state, &[MemberCandidate::invite(target)])
            .unwrap();
        assert_eq!(out.change.delete_banned_members, vec![target]);

        let next = apply_next(&s.state, &out.change).unwrap();
        assert!(next.is_pending(&target));
        assert!(!next.is_banned(&target));
    }

    #[test]
    fn test_invitee_accepts() {
        let s = setup();
        let invitee = ServiceId::random_aci();
        let invite = s
            .ops
            .add_members(&s.state, &[MemberCandidate::invite(invitee)])
            .unwrap();
        let invited_state = apply_next(&s.state, &invite.change).unwrap();

        let invitee_ops = ops_for(&s.master, invitee);
        let key = ProfileKey::generate();
        let accept = invitee_ops.accept_invitation(&invited_state, key).unwrap();
        let joined = apply_next(&invited_state, &accept.change).unwrap();
        assert_eq!(joined.members[&invitee].profile_key, key);
        assert_eq!(joined.members[&invitee].joined_at_revision, 3);
    }

    #[test]
    fn test_pni_invitee_accepts_as_aci() {
        let s = setup();
        let pni = ServiceId::random_pni();
        let aci = ServiceId::random_aci();
        let invite = s
            .ops
            .add_members(&s.state, &[MemberCandidate::invite(pni)])
            .unwrap();
        let invited_state = apply_next(&s.state, &invite.change).unwrap();

        let accept = ops_for(&s.master, aci)
            .accept_pni_invitation(&invited_state, pni, ProfileKey::generate())
            .unwrap();
        let joined = apply_next(&invited_state, &accept.change).unwrap();
        assert_eq!(joined.members[&aci].pni, Some(pni));
        assert!(!joined.is_pending(&pni));
    }

    #[test]
    fn test_join_request_flow() {
        let s = setup();
        let joiner = ServiceId::random_aci();
        let key = ProfileKey::generate();
        let request = ops_for(&s.master, joiner)
            .request_to_join(&s.state, key)
            .unwrap();
        let requested = apply_next(&s.state, &request.change).unwrap();
        assert!(requested.is_requesting(&joiner));

        let approve = s.ops.approve_join_requests(&requested, &[joiner]).unwrap();
        let approved = apply_next(&requested, &approve.change).unwrap();
        assert_eq!(approved.members[&joiner].profile_key, key);

        // Denying after approval is a no-op.
        let deny = s.ops.deny_join_requests(&approved, &[joiner], false).unwrap();
        assert!(deny.is_empty());
    }

    #[test]
    fn test_deny_and_ban() {
        let s = setup();
        let joiner = ServiceId::random_aci();
        let request = ops_for(&s.master, joiner)
            .request_to_join(&s.state, ProfileKey::generate())
            .unwrap();
        let requested = apply_next(&s.state, &request.change).unwrap();

        let deny = s.ops.deny_join_requests(&requested, &[joiner], true).unwrap();
        let denied = apply_next(&requested, &deny.change).unwrap();
        assert!(!denied.is_requesting(&joiner));
        assert!(denied.is_banned(&joiner));
        assert!(denied.find_membership_overlap().is_none());
    }

    #[test]
    fn test_ban_member_removes_and_bans() {
        let mut s = setup();
        let troll = ServiceId::random_aci();
        s.state
            .members
            .insert(troll, Member::new(troll, Role::Default, ProfileKey::generate(), 1));

        let out = s.ops.ban_members(&s.state, &[troll]).unwrap();
        assert_eq!(out.change.delete_members, vec![troll]);
        let next = apply_next(&s.state, &out.change).unwrap();
        assert!(!next.is_member(&troll));
        assert!(next.is_banned(&troll));

        let unban = s.ops.unban_members(&next, &[troll]).unwrap();
        let after = apply_next(&next, &unban.change).unwrap();
        assert!(!after.is_banned(&troll));
    }

    #[test]
    fn test_ban_respects_configured_capacity() {
        let master = GroupMasterKey::generate();
        let admin = ServiceId::random_aci();
        let config = GroupsConfig {
            banned_member_capacity: 2,
            ..Default::default()
        };
        let ops = GroupOperations::new(&master, admin, config).unwrap();
        let mut state = GroupState::new(1);
        for at in [10u64, 20] {
            let id = ServiceId::random_aci();
            state.banned_members.insert(id, BannedMember::new(id, at));
        }
        let oldest = state
            .banned_members
            .values()
            .min_by_key(|b| b.banned_at)
            .map(|b| b.service_id)
            .unwrap();

        let out = ops.ban_members(&state, &[ServiceId::random_aci()]).unwrap();
        assert_eq!(out.change.delete_banned_members, vec![oldest]);
        let next = apply_next(&state, &out.change).unwrap();
        assert_eq!(next.banned_members.len(), 2);
    }

    #[test]
    fn test_rotate_invite_link() {
        let s = setup();
        let out = s.ops.rotate_invite_link(&s.state).unwrap();
        let password = out.change.new_invite_link_password.clone().unwrap();
        assert_eq!(password.len(), 16);

        let next = apply_next(&s.state, &out.change).unwrap();
        let again = s.ops.set_invite_link_password(&next, password).unwrap();
        assert!(!again.is_empty());
    }

    #[test]
    fn test_leave_group() {
        let mut s = setup();
        let other = ServiceId::random_aci();
        s.state
            .members
            .insert(other, Member::new(other, Role::Default, ProfileKey::generate(), 1));

        assert!(matches!(
            s.ops.leave_group(&s.state, &[]),
            Err(OperationsError::LastAdministrator)
        ));

        let invited = ServiceId::random_aci();
        s.state
            .pending_members
            .insert(invited, PendingMember::new(invited, Role::Default, s.admin, 5));
        for stranger in [invited, ServiceId::random_aci()] {
            assert!(matches!(
                s.ops.leave_group(&s.state, &[other, stranger]),
                Err(OperationsError::SuccessorNotMember(id)) if id == stranger
            ));
        }

        let out = s.ops.leave_group(&s.state, &[other]).unwrap();
        let next = apply_next(&s.state, &out.change).unwrap();
        assert!(!next.is_member(&s.admin));
        assert!(next.is_admin(&other));

        assert!(matches!(
            s.ops.leave_group(&next, &[]),
            Err(OperationsError::NotInGroup)
        ));
    }

    #[test]
    fn test_update_profile_key_requires_membership() {
        let s = setup();
        let key = ProfileKey::generate();
        let out = s.ops.update_profile_key(&s.state, key).unwrap();
        assert!(out.change.is_profile_key_only());

        let stranger = ops_for(&s.master, ServiceId::random_aci());
        assert!(matches!(
            stranger.update_profile_key(&s.state, key),
            Err(OperationsError::NotInGroup)
        ));
    }

    #[test]
    fn test_outbound_change_decrypts_on_another_device() {
        let s = setup();
        let (public_key, private_key) = generate_keypair();
        let out = s
            .ops
            .modify_disappearing_messages_timer(&s.state, Duration::from_secs(604_800))
            .unwrap();
        let actions = out.encode().unwrap();
        let wire = WireGroupChange {
            server_signature: sign_change(&actions, &private_key).to_vec(),
            actions,
            change_epoch: HIGHEST_KNOWN_EPOCH,
        };

        let other_device = ops_for(&s.master, s.admin);
        let bytes = wire.encode().unwrap();
        let change = other_device
            .decrypt_change_bytes(&bytes, ChangeVerification::VerifyServerSignature(public_key))
            .unwrap()
            .unwrap();
        assert_eq!(change, out.change);
    }

    #[test]
    fn test_bad_server_signature_rejected() {
        let s = setup();
        let (public_key, _) = generate_keypair();
        let (_, wrong_private) = generate_keypair();
        let out = s.ops.modify_title(&s.state, "x").unwrap();
        let actions = out.encode().unwrap();
        let wire = WireGroupChange {
            server_signature: sign_change(&actions, &wrong_private).to_vec(),
            actions,
            change_epoch: 1,
        };
        assert!(matches!(
            s.ops
                .decrypt_change(&wire, ChangeVerification::VerifyServerSignature(public_key)),
            Err(OperationsError::InvalidServerSignature)
        ));
        assert!(s
            .ops
            .decrypt_change(&wire, ChangeVerification::AlreadyTrusted)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_future_epoch_returns_none() {
        let s = setup();
        let out = s.ops.modify_title(&s.state, "x").unwrap();
        let wire = WireGroupChange {
            actions: out.encode().unwrap(),
            server_signature: Vec::new(),
            change_epoch: HIGHEST_KNOWN_EPOCH + 1,
        };
        assert_eq!(
            s.ops
                .decrypt_change(&wire, ChangeVerification::AlreadyTrusted)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_future_envelope_with_new_field_returns_none() {
        let s = setup();
        let mut future = std::collections::BTreeMap::new();
        future.insert("1".to_string(), ciborium::Value::Bytes(vec![0xA0]));
        future.insert("3".to_string(), ciborium::Value::Integer((HIGHEST_KNOWN_EPOCH + 1).into()));
        future.insert("4".to_string(), ciborium::Value::Bool(true));
        let bytes = crate::groups::wire::cbor_encode(&future).unwrap();

        assert!(s
            .ops
            .decrypt_change_bytes(&bytes, ChangeVerification::AlreadyTrusted)
            .unwrap()
            .is_none());

        // The same envelope at a known epoch still fails closed.
        future.insert("3".to_string(), ciborium::Value::Integer(HIGHEST_KNOWN_EPOCH.into()));
        let bytes = crate::groups::wire::cbor_encode(&future).unwrap();
        assert!(matches!(
            s.ops
                .decrypt_change_bytes(&bytes, ChangeVerification::AlreadyTrusted),
            Err(OperationsError::Wire(WireError::UnknownField { .. }))
        ));
    }

    #[test]
    fn test_state_bytes_roundtrip() {
        let s = setup();
        let wire = s.ops.encrypt_state(&s.state).unwrap();
        let bytes = wire.encode().unwrap();
        assert_eq!(s.ops.decrypt_state_bytes(&bytes).unwrap(), s.state);
    }
}
