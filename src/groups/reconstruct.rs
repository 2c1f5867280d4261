/// Change reconstructor: the left inverse of [`apply`](crate::groups::apply::apply).
///
/// Given two snapshots, `reconstruct` emits the smallest `GroupStateChange`
/// such that `apply(before, reconstruct(before, after)) == after`. Identity
/// keyed collections are diffed by key. Moves from pending or requesting into
/// `members` come out as promotions whenever the promoted member is exactly
/// what `apply` would build from that promotion; anything else falls back to
/// a direct add, which supersedes the old entry on its own.
///
/// The returned change has `editor = None` and `revision = after.revision`.

use std::collections::BTreeSet;

use crate::groups::change::{
    GroupStateChange, PendingPromotion, PniPromotion, ProfileKeyChange, RequestApproval,
    RoleChange,
};
use crate::groups::ids::ServiceId;
use crate::groups::state::{GroupState, Member};

/// Compute the delta that turns `before` into `after`.
pub fn reconstruct(before: &GroupState, after: &GroupState) -> GroupStateChange {
    let mut change = GroupStateChange::new(after.revision);

    // PNIs whose pending entry is consumed by a PNI promotion.
    let mut consumed_pnis: BTreeSet<ServiceId> = BTreeSet::new();

    // -- full members ------------------------------------------------------

    for (aci, member) in &after.members {
        match before.members.get(aci) {
            Some(old) => diff_member(old, member, &mut change),
            None => classify_new_member(before, after, member, &mut change, &mut consumed_pnis),
        }
    }

    change.delete_members = before
        .members
        .keys()
        .filter(|aci| !after.members.contains_key(aci))
        .copied()
        .collect();

    // -- pending -----------------------------------------------------------

    for (id, pending) in &after.pending_members {
        if before.pending_members.get(id) != Some(pending) {
            change.new_pending_members.push(pending.clone());
        }
    }
    change.delete_pending_members = before
        .pending_members
        .keys()
        .filter(|id| {
            !after.pending_members.contains_key(id)
                && !after.members.contains_key(id)
                && !consumed_pnis.contains(id)
        })
        .copied()
        .collect();

    // -- scalar attributes ---------------------------------------------------

    if before.title != after.title {
        change.new_title = Some(after.title.clone());
    }
    if before.avatar != after.avatar {
        change.new_avatar = Some(after.avatar.clone());
    }
    if before.disappearing_messages_timer != after.disappearing_messages_timer {
        change.new_timer = Some(after.disappearing_messages_timer);
    }
    let (old_acl, new_acl) = (&before.access_control, &after.access_control);
    if old_acl.attributes != new_acl.attributes {
        change.new_attribute_access = Some(new_acl.attributes);
    }
    if old_acl.members != new_acl.members {
        change.new_member_access = Some(new_acl.members);
    }
    if old_acl.add_from_invite_link != new_acl.add_from_invite_link {
        change.new_invite_link_access = Some(new_acl.add_from_invite_link);
    }

    // -- requesting ----------------------------------------------------------

    for (aci, request) in &after.requesting_members {
        if before.requesting_members.get(aci) != Some(request) {
            change.new_requesting_members.push(request.clone());
        }
    }
    change.delete_requesting_members = before
        .requesting_members
        .keys()
        .filter(|aci| {
            !after.requesting_members.contains_key(aci) && !after.members.contains_key(aci)
        })
        .copied()
        .collect();

    if before.invite_link_password != after.invite_link_password {
        change.new_invite_link_password = Some(after.invite_link_password.clone());
    }
    if before.description != after.description {
        change.new_description = Some(after.description.clone());
    }
    if before.announcements_only != after.announcements_only {
        change.new_announcements_only = Some(after.announcements_only);
    }

    // -- banned ----------------------------------------------------------------

    for (id, banned) in &after.banned_members {
        if before.banned_members.get(id) != Some(banned) {
            change.new_banned_members.push(banned.clone());
        }
    }
    change.delete_banned_members = before
        .banned_members
        .keys()
        .filter(|id| !after.banned_members.contains_key(id) && !after.members.contains_key(id))
        .copied()
        .collect();

    change
}

/// Member present in both snapshots.
fn diff_member(old: &Member, new: &Member, change: &mut GroupStateChange) {
    // Join revision and PNI linkage cannot be edited in place; re-add.
    if old.joined_at_revision != new.joined_at_revision || old.pni != new.pni {
        change.new_members.push(new.clone());
        return;
    }
    if old.role != new.role {
        change.modify_member_roles.push(RoleChange {
            aci: new.aci,
            role: new.role,
        });
    }
    if old.profile_key != new.profile_key {
        change.modify_profile_keys.push(ProfileKeyChange {
            aci: new.aci,
            profile_key: new.profile_key,
        });
    }
}

/// Member present only in `after`: promotion if it matches one exactly,
/// direct add otherwise.
fn classify_new_member(
    before: &GroupState,
    after: &GroupState,
    member: &Member,
    change: &mut GroupStateChange,
    consumed_pnis: &mut BTreeSet<ServiceId>,
) {
    let revision = after.revision;
    let aci = member.aci;
    let fresh = member.joined_at_revision == revision;

    if let Some(pending) = before.pending_members.get(&aci) {
        if fresh && member.pni.is_none() && member.role == pending.role {
            change.promote_pending_members.push(PendingPromotion {
                aci,
                profile_key: member.profile_key,
            });
            return;
        }
    }

    if let Some(request) = before.requesting_members.get(&aci) {
        if fresh && member.pni.is_none() && member.profile_key == request.profile_key {
            change.promote_requesting_members.push(RequestApproval {
                aci,
                role: member.role,
            });
            return;
        }
    }

    if let Some(pni) = member.pni {
        let invite_consumed =
            !after.pending_members.contains_key(&pni) && !consumed_pnis.contains(&pni);
        let role_matches = before
            .pending_members
            .get(&pni)
            .map(|pending| pending.role == member.role)
            .unwrap_or(false);
        if fresh && invite_consumed && role_matches {
            consumed_pnis.insert(pni);
            change.promote_pending_pni_aci_members.push(PniPromotion {
                aci,
                pni,
                profile_key: member.profile_key,
            });
            return;
        }
    }

    change.new_members.push(member.clone());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::apply::apply;
    use crate::groups::ids::ProfileKey;
    use crate::groups::state::{
        AccessRequired, BannedMember, PendingMember, RequestingMember, Role,
    };
    use std::time::Duration;

    fn base() -> (GroupState, ServiceId) {
        let admin = ServiceId::random_aci();
        let mut state = GroupState::new(10);
        state.title = "Band".into();
        state.members.insert(
            admin,
            Member::new(admin, Role::Administrator, ProfileKey::generate(), 1),
        );
        (state, admin)
    }

    fn assert_round_trip(before: &GroupState, after: &GroupState) -> GroupStateChange {
        let change = reconstruct(before, after);
        assert_eq!(&apply(before, &change).unwrap(), after);
        change
    }

    #[test]
    fn test_identical_states_give_empty_change() {
        let (state, _) = base();
        let change = reconstruct(&state, &state);
        assert!(change.is_empty());
        assert_eq!(change.revision, state.revision);
        assert_eq!(change.editor, None);
    }

    #[test]
    fn test_scalar_diff() {
        let (before, _) = base();
        let mut after = before.clone();
        after.revision = 11;
        after.title = "Band (reunion)".into();
        after.disappearing_messages_timer = Duration::from_secs(60);
        after.access_control.members = AccessRequired::Administrator;
        after.announcements_only = true;

        let change = assert_round_trip(&before, &after);
        assert_eq!(change.new_title.as_deref(), Some("Band (reunion)"));
        assert_eq!(change.new_timer, Some(Duration::from_secs(60)));
        assert_eq!(change.new_member_access, Some(AccessRequired::Administrator));
        assert_eq!(change.new_announcements_only, Some(true));
        assert!(change.new_avatar.is_none());
        assert!(change.new_description.is_none());
        assert_eq!(change.action_count(), 4);
    }

    #[test]
    fn test_pending_to_member_is_promotion() {
        let (mut before, admin) = base();
        let invitee = ServiceId::random_aci();
        before
            .pending_members
            .insert(invitee, PendingMember::new(invitee, Role::Default, admin, 5));

        let mut after = before.clone();
        after.revision = 11;
        after.pending_members.clear();
        after.members.insert(
            invitee,
            Member::new(invitee, Role::Default, ProfileKey::generate(), 11),
        );

        let change = assert_round_trip(&before, &after);
        assert_eq!(change.promote_pending_members.len(), 1);
        assert!(change.new_members.is_empty());
        assert!(change.delete_pending_members.is_empty());
    }

    #[test]
    fn test_pending_to_member_with_other_role_is_direct_add() {
        let (mut before, admin) = base();
        let invitee = ServiceId::random_aci();
        before
            .pending_members
            .insert(invitee, PendingMember::new(invitee, Role::Default, admin, 5));

        let mut after = before.clone();
        after.revision = 11;
        after.pending_members.clear();
        after.members.insert(
            invitee,
            Member::new(invitee, Role::Administrator, ProfileKey::generate(), 11),
        );

        let change = assert_round_trip(&before, &after);
        assert!(change.promote_pending_members.is_empty());
        assert_eq!(change.new_members.len(), 1);
    }

    #[test]
    fn test_requesting_to_member_is_approval() {
        let (mut before, _) = base();
        let joiner = ServiceId::random_aci();
        let key = ProfileKey::generate();
        before
            .requesting_members
            .insert(joiner, RequestingMember::new(joiner, key, 5));

        let mut after = before.clone();
        after.revision = 11;
        after.requesting_members.clear();
        after
            .members
            .insert(joiner, Member::new(joiner, Role::Default, key, 11));

        let change = assert_round_trip(&before, &after);
        assert_eq!(
            change.promote_requesting_members,
            vec![RequestApproval {
                aci: joiner,
                role: Role::Default
            }]
        );
        assert!(change.delete_requesting_members.is_empty());
    }

    #[test]
    fn test_pni_invite_to_member_is_pni_promotion() {
        let (mut before, admin) = base();
        let pni = ServiceId::random_pni();
        let aci = ServiceId::random_aci();
        before
            .pending_members
            .insert(pni, PendingMember::new(pni, Role::Default, admin, 5));

        let mut after = before.clone();
        after.revision = 11;
        after.pending_members.clear();
        let mut member = Member::new(aci, Role::Default, ProfileKey::generate(), 11);
        member.pni = Some(pni);
        after.members.insert(aci, member);

        let change = assert_round_trip(&before, &after);
        assert_eq!(change.promote_pending_pni_aci_members.len(), 1);
        assert!(change.delete_pending_members.is_empty());
        assert!(change.new_members.is_empty());
    }

    #[test]
    fn test_member_edits_and_removal() {
        let (mut before, admin) = base();
        let other = ServiceId::random_aci();
        let leaver = ServiceId::random_aci();
        before
            .members
            .insert(other, Member::new(other, Role::Default, ProfileKey::generate(), 2));
        before
            .members
            .insert(leaver, Member::new(leaver, Role::Default, ProfileKey::generate(), 3));

        let mut after = before.clone();
        after.revision = 11;
        after.members.remove(&leaver);
        after.members.get_mut(&other).unwrap().role = Role::Administrator;
        after.members.get_mut(&admin).unwrap().profile_key = ProfileKey::generate();

        let change = assert_round_trip(&before, &after);
        assert_eq!(change.delete_members, vec![leaver]);
        assert_eq!(change.modify_member_roles.len(), 1);
        assert_eq!(change.modify_profile_keys.len(), 1);
        assert!(change.new_members.is_empty());
    }

    #[test]
    fn test_ban_member_and_unban() {
        let (mut before, admin) = base();
        let troll = ServiceId::random_aci();
        let forgiven = ServiceId::random_aci();
        before
            .members
            .insert(troll, Member::new(troll, Role::Default, ProfileKey::generate(), 2));
        before
            .banned_members
            .insert(forgiven, BannedMember::new(forgiven, 100));

        let mut after = before.clone();
        after.revision = 11;
        after.members.remove(&troll);
        after.banned_members.remove(&forgiven);
        after
            .banned_members
            .insert(troll, BannedMember::new(troll, 200));
        after.pending_members.insert(
            forgiven,
            PendingMember::new(forgiven, Role::Default, admin, 300),
        );

        let change = assert_round_trip(&before, &after);
        assert_eq!(change.delete_members, vec![troll]);
        assert_eq!(change.new_banned_members.len(), 1);
        assert_eq!(change.delete_banned_members, vec![forgiven]);
        assert_eq!(change.new_pending_members.len(), 1);
    }

    #[test]
    fn test_rejoin_is_re_add() {
        let (before, admin) = base();
        let mut after = before.clone();
        after.revision = 11;
        after.members.get_mut(&admin).unwrap().joined_at_revision = 11;

        let change = assert_round_trip(&before, &after);
        assert_eq!(change.new_members.len(), 1);
        assert!(change.modify_member_roles.is_empty());
    }
}
