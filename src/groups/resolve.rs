/// Conflict resolver: trims an intended change against the latest state.
///
/// Two devices racing on the same group routinely produce changes that are
/// partly already satisfied. Before anything is sent, every sub-operation that
/// would be a no-op against the current `GroupState` is dropped, and a few
/// ambiguous ones are rewritten into their canonical form (a direct add of an
/// invited identity becomes a promotion).
///
/// The rules are written once against the `ChangeSetModifier` seam and run
/// either on the decrypted change alone or, in the full variant, on the
/// decrypted change and its encrypted `WireActions` in lock-step. Every list
/// is walked in reverse over its original indices so index-based removals stay
/// valid while entries are dropped.
///
/// Banned-list capacity is enforced here, not in `apply`: when new bans would
/// overflow it, the oldest existing bans are evicted through explicit
/// delete-banned entries.

use std::collections::BTreeSet;
use std::convert::Infallible;
use thiserror::Error;

use crate::groups::change::{GroupStateChange, PendingPromotion};
use crate::groups::codec::{CodecError, GroupCodec};
use crate::groups::ids::ServiceId;
use crate::groups::state::GroupState;
use crate::groups::wire::{WireActions, WirePromotePending};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Wire actions out of step with decrypted change at {field}")]
    ActionsOutOfStep { field: &'static str },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// ChangeSetModifier
// ---------------------------------------------------------------------------

/// Edits applied by the resolver. Indices refer to positions in the lists of
/// the change being resolved.
pub trait ChangeSetModifier {
    type Error;

    fn remove_add_member(&mut self, i: usize);
    /// Turn add-member `i` into a promote-pending entry appended to that list.
    fn move_add_member_to_promote(&mut self, i: usize);
    fn remove_delete_member(&mut self, i: usize);
    fn remove_modify_member_role(&mut self, i: usize);
    fn remove_modify_profile_key(&mut self, i: usize);
    fn remove_add_pending_member(&mut self, i: usize);
    fn remove_delete_pending_member(&mut self, i: usize);
    fn remove_promote_pending_member(&mut self, i: usize);
    fn clear_title(&mut self);
    fn clear_avatar(&mut self);
    fn clear_timer(&mut self);
    fn clear_attribute_access(&mut self);
    fn clear_member_access(&mut self);
    fn clear_invite_link_access(&mut self);
    fn remove_add_requesting_member(&mut self, i: usize);
    /// Turn add-requesting `i` into a promote-pending entry.
    fn move_requesting_to_promote(&mut self, i: usize);
    fn remove_delete_requesting_member(&mut self, i: usize);
    fn remove_promote_requesting_member(&mut self, i: usize);
    fn clear_description(&mut self);
    fn clear_announcements_only(&mut self);
    fn remove_add_banned_member(&mut self, i: usize);
    fn remove_delete_banned_member(&mut self, i: usize);
    /// Append an explicit delete-banned entry (ban eviction).
    fn add_delete_banned_member(&mut self, service_id: &ServiceId) -> Result<(), Self::Error>;
    fn remove_promote_pni_aci_member(&mut self, i: usize);
}

/// Edits a decrypted `GroupStateChange` in place.
pub struct DecryptedChangeModifier<'a> {
    change: &'a mut GroupStateChange,
}

impl<'a> DecryptedChangeModifier<'a> {
    pub fn new(change: &'a mut GroupStateChange) -> Self {
        DecryptedChangeModifier { change }
    }
}

impl ChangeSetModifier for DecryptedChangeModifier<'_> {
    type Error = Infallible;

    fn remove_add_member(&mut self, i: usize) {
        self.change.new_members.remove(i);
    }

    fn move_add_member_to_promote(&mut self, i: usize) {
        let member = self.change.new_members.remove(i);
        self.change.promote_pending_members.push(PendingPromotion {
            aci: member.aci,
            profile_key: member.profile_key,
        });
    }

    fn remove_delete_member(&mut self, i: usize) {
        self.change.delete_members.remove(i);
    }

    fn remove_modify_member_role(&mut self, i: usize) {
        self.change.modify_member_roles.remove(i);
    }

    fn remove_modify_profile_key(&mut self, i: usize) {
        self.change.modify_profile_keys.remove(i);
    }

    fn remove_add_pending_member(&mut self, i: usize) {
        self.change.new_pending_members.remove(i);
    }

    fn remove_delete_pending_member(&mut self, i: usize) {
        self.change.delete_pending_members.remove(i);
    }

    fn remove_promote_pending_member(&mut self, i: usize) {
        self.change.promote_pending_members.remove(i);
    }

    fn clear_title(&mut self) {
        self.change.new_title = None;
    }

    fn clear_avatar(&mut self) {
        self.change.new_avatar = None;
    }

    fn clear_timer(&mut self) {
        self.change.new_timer = None;
    }

    fn clear_attribute_access(&mut self) {
        self.change.new_attribute_access = None;
    }

    fn clear_member_access(&mut self) {
        self.change.new_member_access = None;
    }

    fn clear_invite_link_access(&mut self) {
        self.change.new_invite_link_access = None;
    }

    fn remove_add_requesting_member(&mut self, i: usize) {
        self.change.new_requesting_members.remove(i);
    }

    fn move_requesting_to_promote(&mut self, i: usize) {
        let request = self.change.new_requesting_members.remove(i);
        self.change.promote_pending_members.push(PendingPromotion {
            aci: request.aci,
            profile_key: request.profile_key,
        });
    }

    fn remove_delete_requesting_member(&mut self, i: usize) {
        self.change.delete_requesting_members.remove(i);
    }

    fn remove_promote_requesting_member(&mut self, i: usize) {
        self.change.promote_requesting_members.remove(i);
    }

    fn clear_description(&mut self) {
        self.change.new_description = None;
    }

    fn clear_announcements_only(&mut self) {
        self.change.new_announcements_only = None;
    }

    fn remove_add_banned_member(&mut self, i: usize) {
        self.change.new_banned_members.remove(i);
    }

    fn remove_delete_banned_member(&mut self, i: usize) {
        self.change.delete_banned_members.remove(i);
    }

    fn add_delete_banned_member(&mut self, service_id: &ServiceId) -> Result<(), Infallible> {
        self.change.delete_banned_members.push(*service_id);
        Ok(())
    }

    fn remove_promote_pni_aci_member(&mut self, i: usize) {
        self.change.promote_pending_pni_aci_members.remove(i);
    }
}

/// Edits encrypted `WireActions` in place. Deterministic encryption lets
/// converted entries reuse their existing ciphertexts; only evictions need
/// fresh encryption.
pub struct WireChangeModifier<'a> {
    actions: &'a mut WireActions,
    codec: &'a GroupCodec,
}

impl<'a> WireChangeModifier<'a> {
    pub fn new(actions: &'a mut WireActions, codec: &'a GroupCodec) -> Self {
        WireChangeModifier { actions, codec }
    }
}

impl ChangeSetModifier for WireChangeModifier<'_> {
    type Error = CodecError;

    fn remove_add_member(&mut self, i: usize) {
        self.actions.add_members.remove(i);
    }

    fn move_add_member_to_promote(&mut self, i: usize) {
        let member = self.actions.add_members.remove(i);
        self.actions.promote_pending_members.push(WirePromotePending {
            user_id: member.user_id,
            profile_key: member.profile_key,
        });
    }

    fn remove_delete_member(&mut self, i: usize) {
        self.actions.delete_members.remove(i);
    }

    fn remove_modify_member_role(&mut self, i: usize) {
        self.actions.modify_member_roles.remove(i);
    }

    fn remove_modify_profile_key(&mut self, i: usize) {
        self.actions.modify_member_profile_keys.remove(i);
    }

    fn remove_add_pending_member(&mut self, i: usize) {
        self.actions.add_pending_members.remove(i);
    }

    fn remove_delete_pending_member(&mut self, i: usize) {
        self.actions.delete_pending_members.remove(i);
    }

    fn remove_promote_pending_member(&mut self, i: usize) {
        self.actions.promote_pending_members.remove(i);
    }

    fn clear_title(&mut self) {
        self.actions.modify_title = None;
    }

    fn clear_avatar(&mut self) {
        self.actions.modify_avatar = None;
    }

    fn clear_timer(&mut self) {
        self.actions.modify_disappearing_messages_timer = None;
    }

    fn clear_attribute_access(&mut self) {
        self.actions.modify_attributes_access = None;
    }

    fn clear_member_access(&mut self) {
        self.actions.modify_member_access = None;
    }

    fn clear_invite_link_access(&mut self) {
        self.actions.modify_add_from_invite_link_access = None;
    }

    fn remove_add_requesting_member(&mut self, i: usize) {
        self.actions.add_requesting_members.remove(i);
    }

    fn move_requesting_to_promote(&mut self, i: usize) {
        let request = self.actions.add_requesting_members.remove(i);
        self.actions.promote_pending_members.push(WirePromotePending {
            user_id: request.user_id,
            profile_key: request.profile_key,
        });
    }

    fn remove_delete_requesting_member(&mut self, i: usize) {
        self.actions.delete_requesting_members.remove(i);
    }

    fn remove_promote_requesting_member(&mut self, i: usize) {
        self.actions.promote_requesting_members.remove(i);
    }

    fn clear_description(&mut self) {
        self.actions.modify_description = None;
    }

    fn clear_announcements_only(&mut self) {
        self.actions.modify_announcements_only = None;
    }

    fn remove_add_banned_member(&mut self, i: usize) {
        self.actions.add_banned_members.remove(i);
    }

    fn remove_delete_banned_member(&mut self, i: usize) {
        self.actions.delete_banned_members.remove(i);
    }

    fn add_delete_banned_member(&mut self, service_id: &ServiceId) -> Result<(), CodecError> {
        let ciphertext = self.codec.encrypt_identity(service_id)?;
        self.actions.delete_banned_members.push(ciphertext);
        Ok(())
    }

    fn remove_promote_pni_aci_member(&mut self, i: usize) {
        self.actions.promote_pending_pni_aci_members.remove(i);
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Resolve a decrypted change against `state`. The result is empty iff every
/// sub-operation was already satisfied.
pub fn resolve_conflict(
    state: &GroupState,
    change: &GroupStateChange,
    banned_capacity: usize,
) -> GroupStateChange {
    let mut resolved = change.clone();
    let outcome = resolve_with(
        state,
        change,
        banned_capacity,
        &mut DecryptedChangeModifier::new(&mut resolved),
    );
    match outcome {
        Ok(()) => resolved,
        Err(never) => match never {},
    }
}

/// Resolve a decrypted change and its encrypted actions together. The two
/// must describe the same edits entry for entry.
pub fn resolve_conflict_with_actions(
    state: &GroupState,
    change: &GroupStateChange,
    actions: &WireActions,
    codec: &GroupCodec,
    banned_capacity: usize,
) -> Result<(GroupStateChange, WireActions), ConflictError> {
    check_lock_step(change, actions)?;

    let resolved_change = resolve_conflict(state, change, banned_capacity);

    let mut resolved_actions = actions.clone();
    resolve_with(
        state,
        change,
        banned_capacity,
        &mut WireChangeModifier::new(&mut resolved_actions, codec),
    )?;

    Ok((resolved_change, resolved_actions))
}

/// Run every resolution rule, in field order, reading from `change` and
/// writing through `modifier`.
pub fn resolve_with<M: ChangeSetModifier>(
    state: &GroupState,
    change: &GroupStateChange,
    banned_capacity: usize,
    modifier: &mut M,
) -> Result<(), M::Error> {
    // Pending entries the change already promotes or deletes are not
    // candidates for conversion into a promotion.
    let mut already_promoting: BTreeSet<ServiceId> =
        change.promote_pending_members.iter().map(|p| p.aci).collect();
    let deleting_pending: BTreeSet<ServiceId> =
        change.delete_pending_members.iter().copied().collect();
    let convertible =
        |id: &ServiceId| state.is_pending(id) && !deleting_pending.contains(id);

    // 3. add members
    for (i, member) in change.new_members.iter().enumerate().rev() {
        if state.is_member(&member.aci) {
            log::debug!("Dropping add of existing member {:?}", member.aci);
            modifier.remove_add_member(i);
        } else if convertible(&member.aci) {
            if already_promoting.contains(&member.aci) {
                modifier.remove_add_member(i);
            } else {
                log::debug!("Converting add of pending {:?} to promotion", member.aci);
                modifier.move_add_member_to_promote(i);
                already_promoting.insert(member.aci);
            }
        }
    }

    // 4. delete members
    for (i, aci) in change.delete_members.iter().enumerate().rev() {
        if !state.is_member(aci) {
            log::debug!("Dropping removal of non-member {:?}", aci);
            modifier.remove_delete_member(i);
        }
    }

    // 5. modify roles (entries for unknown members are left for apply to reject)
    for (i, edit) in change.modify_member_roles.iter().enumerate().rev() {
        if let Some(member) = state.member(&edit.aci) {
            if member.role == edit.role {
                modifier.remove_modify_member_role(i);
            }
        }
    }

    // 6. modify profile keys
    for (i, edit) in change.modify_profile_keys.iter().enumerate().rev() {
        if let Some(member) = state.member(&edit.aci) {
            if member.profile_key.ct_matches(&edit.profile_key) {
                modifier.remove_modify_profile_key(i);
            }
        }
    }

    // 7. add pending members
    for (i, pending) in change.new_pending_members.iter().enumerate().rev() {
        if state.is_pending(&pending.service_id) || state.is_member(&pending.service_id) {
            log::debug!("Dropping redundant invite of {:?}", pending.service_id);
            modifier.remove_add_pending_member(i);
        }
    }

    // 8. delete pending members
    for (i, service_id) in change.delete_pending_members.iter().enumerate().rev() {
        if !state.is_pending(service_id) {
            modifier.remove_delete_pending_member(i);
        }
    }

    // 9. promote pending members
    for (i, promotion) in change.promote_pending_members.iter().enumerate().rev() {
        if !state.is_pending(&promotion.aci) {
            log::debug!("Dropping promotion of non-pending {:?}", promotion.aci);
            modifier.remove_promote_pending_member(i);
        }
    }

    // 10..15. attributes
    if change.new_title.as_deref() == Some(state.title.as_str()) {
        modifier.clear_title();
    }
    if change.new_avatar.as_deref() == Some(state.avatar.as_str()) {
        modifier.clear_avatar();
    }
    if change.new_timer == Some(state.disappearing_messages_timer) {
        modifier.clear_timer();
    }
    if change.new_attribute_access == Some(state.access_control.attributes) {
        modifier.clear_attribute_access();
    }
    if change.new_member_access == Some(state.access_control.members) {
        modifier.clear_member_access();
    }
    if change.new_invite_link_access == Some(state.access_control.add_from_invite_link) {
        modifier.clear_invite_link_access();
    }

    // 16. add requesting members
    for (i, request) in change.new_requesting_members.iter().enumerate().rev() {
        if state.is_member(&request.aci)
            || state.requesting_members.get(&request.aci) == Some(request)
        {
            modifier.remove_add_requesting_member(i);
        } else if convertible(&request.aci) {
            if already_promoting.contains(&request.aci) {
                modifier.remove_add_requesting_member(i);
            } else {
                log::debug!("Converting join request of pending {:?} to promotion", request.aci);
                modifier.move_requesting_to_promote(i);
                already_promoting.insert(request.aci);
            }
        }
    }

    // 17. delete requesting members
    for (i, aci) in change.delete_requesting_members.iter().enumerate().rev() {
        if !state.is_requesting(aci) {
            modifier.remove_delete_requesting_member(i);
        }
    }

    // 18. promote requesting members
    for (i, approval) in change.promote_requesting_members.iter().enumerate().rev() {
        if !state.is_requesting(&approval.aci) {
            modifier.remove_promote_requesting_member(i);
        }
    }

    // 19. the invite link password is never dropped: a rotation is always intended.

    // 20..21.
    if change.new_description.as_deref() == Some(state.description.as_str()) {
        modifier.clear_description();
    }
    if change.new_announcements_only == Some(state.announcements_only) {
        modifier.clear_announcements_only();
    }

    // 22. add banned members
    for (i, banned) in change.new_banned_members.iter().enumerate().rev() {
        if state.banned_members.get(&banned.service_id) == Some(banned) {
            modifier.remove_add_banned_member(i);
        }
    }

    // 23. delete banned members
    for (i, service_id) in change.delete_banned_members.iter().enumerate().rev() {
        if !state.is_banned(service_id) {
            modifier.remove_delete_banned_member(i);
        }
    }

    // 22/23. capacity
    for evicted in ban_evictions(state, change, banned_capacity) {
        log::debug!("Evicting oldest ban {:?} to stay within capacity", evicted);
        modifier.add_delete_banned_member(&evicted)?;
    }

    // 24. promote PNI invites
    for (i, promotion) in change.promote_pending_pni_aci_members.iter().enumerate().rev() {
        if !state.is_pending(&promotion.pni) {
            modifier.remove_promote_pni_aci_member(i);
        }
    }

    Ok(())
}

/// Existing bans that must be evicted so the banned list stays within
/// `capacity` once `change` is applied.
///
/// Oldest `banned_at` goes first; equal timestamps fall back to identity byte
/// order. Entries the change already deletes, re-bans, or moves into another
/// collection are never candidates.
pub fn ban_evictions(
    state: &GroupState,
    change: &GroupStateChange,
    capacity: usize,
) -> Vec<ServiceId> {
    let adding: BTreeSet<ServiceId> = change
        .new_banned_members
        .iter()
        .map(|b| b.service_id)
        .filter(|id| !state.is_banned(id))
        .collect();
    if adding.is_empty() {
        return Vec::new();
    }

    let rebanned: BTreeSet<ServiceId> = change
        .new_banned_members
        .iter()
        .map(|b| b.service_id)
        .filter(|id| state.is_banned(id))
        .collect();

    // Bans that disappear anyway: explicit deletes, and identities that the
    // change moves into another collection.
    let leaving: BTreeSet<ServiceId> = change
        .delete_banned_members
        .iter()
        .copied()
        .chain(change.new_members.iter().map(|m| m.aci))
        .chain(change.new_pending_members.iter().map(|p| p.service_id))
        .chain(change.new_requesting_members.iter().map(|r| r.aci))
        .chain(change.promote_pending_members.iter().map(|p| p.aci))
        .chain(change.promote_requesting_members.iter().map(|a| a.aci))
        .chain(change.promote_pending_pni_aci_members.iter().map(|p| p.aci))
        .filter(|id| state.is_banned(id))
        .collect();

    let remaining = state.banned_members.len() - leaving.len();
    let total = remaining + adding.len();
    if total <= capacity {
        return Vec::new();
    }
    if adding.len() > capacity {
        log::warn!(
            "{} new bans exceed banned-list capacity {}",
            adding.len(),
            capacity
        );
    }

    let mut candidates: Vec<(u64, ServiceId)> = state
        .banned_members
        .values()
        .filter(|b| !leaving.contains(&b.service_id) && !rebanned.contains(&b.service_id))
        .map(|b| (b.banned_at, b.service_id))
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .take(total - capacity)
        .map(|(_, id)| id)
        .collect()
}

fn check_lock_step(change: &GroupStateChange, actions: &WireActions) -> Result<(), ConflictError> {
    let lists: [(&'static str, usize, usize); 16] = [
        ("add_members", change.new_members.len(), actions.add_members.len()),
        ("delete_members", change.delete_members.len(), actions.delete_members.len()),
        (
            "modify_member_roles",
            change.modify_member_roles.len(),
            actions.modify_member_roles.len(),
        ),
        (
            "modify_member_profile_keys",
            change.modify_profile_keys.len(),
            actions.modify_member_profile_keys.len(),
        ),
        (
            "add_pending_members",
            change.new_pending_members.len(),
            actions.add_pending_members.len(),
        ),
        (
            "delete_pending_members",
            change.delete_pending_members.len(),
            actions.delete_pending_members.len(),
        ),
        (
            "promote_pending_members",
            change.promote_pending_members.len(),
            actions.promote_pending_members.len(),
        ),
        (
            "add_requesting_members",
            change.new_requesting_members.len(),
            actions.add_requesting_members.len(),
        ),
        (
            "delete_requesting_members",
            change.delete_requesting_members.len(),
            actions.delete_requesting_members.len(),
        ),
        (
            "promote_requesting_members",
            change.promote_requesting_members.len(),
            actions.promote_requesting_members.len(),
        ),
        (
            "add_banned_members",
            change.new_banned_members.len(),
            actions.add_banned_members.len(),
        ),
        (
            "delete_banned_members",
            change.delete_banned_members.len(),
            actions.delete_banned_members.len(),
        ),
        (
            "promote_pending_pni_aci_members",
            change.promote_pending_pni_aci_members.len(),
            actions.promote_pending_pni_aci_members.len(),
        ),
        (
            "modify_title",
            change.new_title.is_some() as usize,
            actions.modify_title.is_some() as usize,
        ),
        (
            "modify_description",
            change.new_description.is_some() as usize,
            actions.modify_description.is_some() as usize,
        ),
        (
            "modify_disappearing_messages_timer",
            change.new_timer.is_some() as usize,
            actions.modify_disappearing_messages_timer.is_some() as usize,
        ),
    ];

    match lists.iter().find(|(_, decrypted, wire)| decrypted != wire) {
        Some((field, _, _)) => Err(ConflictError::ActionsOutOfStep { field: *field }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
