/// State applier: the single transition function for decrypted group state.
///
/// `apply` never edits the input. It clones the current snapshot, runs every
/// sub-operation of the change in wire field-number order, and returns the new
/// snapshot stamped with the change's revision.
///
/// Removals of absent identities are silent no-ops. Role and profile-key
/// edits of non-members, and promotions of non-pending identities, are errors.
///
/// Every insertion evicts the identity from the other three collections, so an
/// identity is in at most one of them after any successful apply. A ban of a
/// full member ends the membership.

use thiserror::Error;

use crate::groups::change::GroupStateChange;
use crate::groups::ids::ServiceId;
use crate::groups::state::{GroupState, Member};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Not a member: {0:?}")]
    UnknownMember(ServiceId),

    #[error("Not a pending member: {0:?}")]
    UnknownPendingMember(ServiceId),

    #[error("Already a full member: {0:?}")]
    AlreadyMember(ServiceId),

    #[error("Revision mismatch: expected {expected}, change carries {actual}")]
    RevisionMismatch { expected: u32, actual: u32 },
}

pub type Result<T> = std::result::Result<T, ApplyError>;

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Apply `change` to `state`, producing the next snapshot.
///
/// The resulting revision is always `change.revision`.
pub fn apply(state: &GroupState, change: &GroupStateChange) -> Result<GroupState> {
    let mut next = state.clone();

    // 3. add members (replace on duplicate)
    for member in &change.new_members {
        insert_member(&mut next, member.clone());
    }

    // 4. delete members
    for aci in &change.delete_members {
        next.members.remove(aci);
    }

    // 5. modify roles
    for edit in &change.modify_member_roles {
        let member = next
            .members
            .get_mut(&edit.aci)
            .ok_or(ApplyError::UnknownMember(edit.aci))?;
        member.role = edit.role;
    }

    // 6. modify profile keys
    for edit in &change.modify_profile_keys {
        let member = next
            .members
            .get_mut(&edit.aci)
            .ok_or(ApplyError::UnknownMember(edit.aci))?;
        member.profile_key = edit.profile_key;
    }

    // 7. add pending members
    for pending in &change.new_pending_members {
        if next.is_member(&pending.service_id) {
            return Err(ApplyError::AlreadyMember(pending.service_id));
        }
        let id = pending.service_id;
        next.requesting_members.remove(&id);
        next.banned_members.remove(&id);
        next.pending_members.insert(id, pending.clone());
    }

    // 8. delete pending members
    for service_id in &change.delete_pending_members {
        next.pending_members.remove(service_id);
    }

    // 9. promote pending members
    for promotion in &change.promote_pending_members {
        let pending = next
            .pending_members
            .remove(&promotion.aci)
            .ok_or(ApplyError::UnknownPendingMember(promotion.aci))?;
        insert_member(
            &mut next,
            Member::new(
                promotion.aci,
                pending.role,
                promotion.profile_key,
                change.revision,
            ),
        );
    }

    // 10..15. attributes and access control
    if let Some(title) = &change.new_title {
        next.title = title.clone();
    }
    if let Some(avatar) = &change.new_avatar {
        next.avatar = avatar.clone();
    }
    if let Some(timer) = change.new_timer {
        next.disappearing_messages_timer = timer;
    }
    if let Some(access) = change.new_attribute_access {
        next.access_control.attributes = access;
    }
    if let Some(access) = change.new_member_access {
        next.access_control.members = access;
    }
    if let Some(access) = change.new_invite_link_access {
        next.access_control.add_from_invite_link = access;
    }

    // 16. add requesting members
    for request in &change.new_requesting_members {
        if next.is_member(&request.aci) {
            return Err(ApplyError::AlreadyMember(request.aci));
        }
        next.pending_members.remove(&request.aci);
        next.banned_members.remove(&request.aci);
        next.requesting_members.insert(request.aci, request.clone());
    }

    // 17. delete requesting members
    for aci in &change.delete_requesting_members {
        next.requesting_members.remove(aci);
    }

    // 18. promote requesting members
    for approval in &change.promote_requesting_members {
        match next.requesting_members.remove(&approval.aci) {
            Some(request) => insert_member(
                &mut next,
                Member::new(
                    approval.aci,
                    approval.role,
                    request.profile_key,
                    change.revision,
                ),
            ),
            None => {
                log::warn!(
                    "Skipping approval of {:?}: no outstanding join request",
                    approval.aci
                );
            }
        }
    }

    // 19..21.
    if let Some(password) = &change.new_invite_link_password {
        next.invite_link_password = password.clone();
    }
    if let Some(description) = &change.new_description {
        next.description = description.clone();
    }
    if let Some(announcements_only) = change.new_announcements_only {
        next.announcements_only = announcements_only;
    }

    // 22. add banned members
    for banned in &change.new_banned_members {
        let id = banned.service_id;
        if next.members.remove(&id).is_some() {
            log::debug!("Ban of {:?} ends their membership", id);
        }
        next.pending_members.remove(&id);
        next.requesting_members.remove(&id);
        next.banned_members.insert(id, banned.clone());
    }

    // 23. delete banned members
    for service_id in &change.delete_banned_members {
        next.banned_members.remove(service_id);
    }

    // 24. promote pending PNI invites to ACI members
    for promotion in &change.promote_pending_pni_aci_members {
        let pending = next
            .pending_members
            .remove(&promotion.pni)
            .ok_or(ApplyError::UnknownPendingMember(promotion.pni))?;
        let mut member = Member::new(
            promotion.aci,
            pending.role,
            promotion.profile_key,
            change.revision,
        );
        member.pni = Some(promotion.pni);
        insert_member(&mut next, member);
    }

    next.revision = change.revision;
    Ok(next)
}

/// As [`apply`], but only accepts the change that directly follows `state`.
pub fn apply_next(state: &GroupState, change: &GroupStateChange) -> Result<GroupState> {
    let expected = state.revision.wrapping_add(1);
    if change.revision != expected {
        return Err(ApplyError::RevisionMismatch {
            expected,
            actual: change.revision,
        });
    }
    apply(state, change)
}

/// Insert (or replace) a full member. A direct add supersedes any outstanding
/// invite, join request, or ban for the same identity.
fn insert_member(state: &mut GroupState, member: Member) {
    let aci = member.aci;
    state.pending_members.remove(&aci);
    state.requesting_members.remove(&aci);
    state.banned_members.remove(&aci);
    state.members.insert(aci, member);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
