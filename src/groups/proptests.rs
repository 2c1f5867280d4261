//! Property-based tests for the group engine.
//!
//! These cover the invariants the engine relies on:
//! 1. `apply(before, reconstruct(before, after)) == after` for any two states
//! 2. A change already reflected in the state resolves to nothing
//! 3. Applying a resolved change leaves nothing left to resolve
//! 4. Ban eviction keeps the newest entries and stays within capacity
//! 5. A corrupted identity degrades only its own slot in a list
//! 6. A direct add of an invited identity becomes a promotion
//! 7. No identity is in two collections after any successful apply

use proptest::prelude::*;
use uuid::Uuid;

use crate::groups::apply::apply;
use crate::groups::change::GroupStateChange;
use crate::groups::codec::{access_from_wire, GroupCodec};
use crate::groups::ids::{GroupMasterKey, ProfileKey, ServiceId};
use crate::groups::reconstruct::reconstruct;
use crate::groups::resolve::{ban_evictions, resolve_conflict};
use crate::groups::state::{
    AccessControl, BannedMember, GroupState, Member, PendingMember, RequestingMember, Role,
};

const ACI_POOL: u8 = 8;
const PNI_POOL: u8 = 4;
const CAPACITY: usize = 10;

fn aci(n: u8) -> ServiceId {
    ServiceId::Aci(Uuid::from_bytes([n + 1; 16]))
}

fn pni(n: u8) -> ServiceId {
    ServiceId::Pni(Uuid::from_bytes([n + 1; 16]))
}

fn role(admin: bool) -> Role {
    if admin {
        Role::Administrator
    } else {
        Role::Default
    }
}

fn codec() -> GroupCodec {
    GroupCodec::new(&GroupMasterKey::from_bytes([0x42; 32])).unwrap()
}

// ==================== Strategies ====================

prop_compose! {
    /// A group state over a small identity pool so that states drawn
    /// independently share identities often. Each identity lands in at most
    /// one collection; members are ACIs, invites and bans may be PNIs.
    fn arb_state()(
        revision in 0u32..4,
        title in "[ab]{0,2}",
        description in "[ab]{0,1}",
        avatar in "[ab]{0,1}",
        timer_minutes in 0u64..3,
        access in (1u8..=4, 1u8..=4, 1u8..=4),
        announcements_only in any::<bool>(),
        password in prop::collection::vec(0u8..2, 0..2),
        acis in prop::collection::vec(
            (0u8..5, any::<bool>(), 0u8..3, 0u32..4, 0u64..4, prop::option::of(0u8..PNI_POOL)),
            ACI_POOL as usize,
        ),
        pnis in prop::collection::vec((0u8..3, any::<bool>(), 0u64..4), PNI_POOL as usize),
    ) -> GroupState {
        let mut state = GroupState::new(revision);
        state.title = title;
        state.description = description;
        state.avatar = avatar;
        state.disappearing_messages_timer = std::time::Duration::from_secs(timer_minutes * 60);
        state.access_control = AccessControl {
            attributes: access_from_wire(access.0).unwrap(),
            members: access_from_wire(access.1).unwrap(),
            add_from_invite_link: access_from_wire(access.2).unwrap(),
        };
        state.announcements_only = announcements_only;
        state.invite_link_password = password;

        for (n, (slot, admin, key, joined, at, linked)) in acis.into_iter().enumerate() {
            let id = aci(n as u8);
            let profile_key = ProfileKey([key; 32]);
            match slot {
                1 => {
                    let mut member = Member::new(id, role(admin), profile_key, joined);
                    member.pni = linked.map(pni);
                    state.members.insert(id, member);
                }
                2 => {
                    state
                        .pending_members
                        .insert(id, PendingMember::new(id, role(admin), aci(0), at));
                }
                3 => {
                    state
                        .requesting_members
                        .insert(id, RequestingMember::new(id, profile_key, at));
                }
                4 => {
                    state.banned_members.insert(id, BannedMember::new(id, at));
                }
                _ => {}
            }
        }

        for (n, (slot, admin, at)) in pnis.into_iter().enumerate() {
            let id = pni(n as u8);
            match slot {
                1 => {
                    state
                        .pending_members
                        .insert(id, PendingMember::new(id, role(admin), aci(0), at));
                }
                2 => {
                    state.banned_members.insert(id, BannedMember::new(id, at));
                }
                _ => {}
            }
        }

        state
    }
}

// ==================== Reconstruction ====================

proptest! {
    /// Reconstruction is the left inverse of apply, promotions included.
    #[test]
    fn reconstruct_then_apply_reaches_target(before in arb_state(), after in arb_state()) {
        let change = reconstruct(&before, &after);
        prop_assert_eq!(apply(&before, &change), Ok(after));
    }

    /// Identical states produce an empty change.
    #[test]
    fn reconstruct_of_identical_states_is_empty(state in arb_state()) {
        prop_assert!(reconstruct(&state, &state).is_empty());
    }
}

// ==================== Conflict resolution ====================

proptest! {
    /// Every action of a change already reflected in the state is dropped.
    /// The invite link password is excluded: a rotation is never dropped.
    #[test]
    fn satisfied_change_resolves_empty(before in arb_state(), after in arb_state()) {
        let mut change = reconstruct(&before, &after);
        change.new_invite_link_password = None;
        let resolved = resolve_conflict(&after, &change, CAPACITY);
        prop_assert!(resolved.is_empty(), "left over: {:?}", resolved);
    }

    /// A resolved change applies cleanly, and once applied there is nothing
    /// left for a second resolution to do.
    #[test]
    fn resolved_change_is_idempotent(state in arb_state(), target in arb_state()) {
        let change = reconstruct(&state, &target);
        let resolved = resolve_conflict(&state, &change, CAPACITY);

        let once = apply(&state, &resolved);
        prop_assert!(once.is_ok(), "resolved change rejected: {:?}", once);
        let once = once.unwrap();

        let again = resolve_conflict(&once, &resolved, CAPACITY);
        prop_assert_eq!(apply(&once, &again), Ok(once.clone()));
    }

    /// Scalar attributes that differ from the state always survive resolution.
    #[test]
    fn differing_attributes_survive(state in arb_state(), target in arb_state()) {
        let change = reconstruct(&state, &target);
        let resolved = resolve_conflict(&state, &change, CAPACITY);
        prop_assert_eq!(resolved.new_title, change.new_title);
        prop_assert_eq!(resolved.new_description, change.new_description);
        prop_assert_eq!(resolved.new_timer, change.new_timer);
        prop_assert_eq!(resolved.new_announcements_only, change.new_announcements_only);
    }

    /// A role change resolves to nothing when the role already matches and to
    /// exactly one action otherwise.
    #[test]
    fn role_change_resolution(state in arb_state(), admin in any::<bool>()) {
        for (aci, member) in &state.members {
            let mut change = GroupStateChange::new(state.revision + 1);
            change.modify_member_roles.push(crate::groups::change::RoleChange {
                aci: *aci,
                role: role(admin),
            });
            let resolved = resolve_conflict(&state, &change, CAPACITY);
            let expected = usize::from(member.role != role(admin));
            prop_assert_eq!(resolved.modify_member_roles.len(), expected);
        }
    }

    /// Adding an invited ACI directly turns into a promotion, and applying the
    /// result leaves the identity a member and no longer invited.
    #[test]
    fn direct_add_of_invited_becomes_promotion(state in arb_state(), key in any::<u8>()) {
        let invited: Vec<ServiceId> = state
            .pending_members
            .keys()
            .copied()
            .filter(ServiceId::is_aci)
            .collect();
        for id in invited {
            let mut change = GroupStateChange::new(state.revision + 1);
            change
                .new_members
                .push(Member::new(id, Role::Default, ProfileKey([key; 32]), state.revision + 1));
            let resolved = resolve_conflict(&state, &change, CAPACITY);
            prop_assert!(resolved.new_members.is_empty());
            prop_assert_eq!(resolved.promote_pending_members.len(), 1);

            let next = apply(&state, &resolved).unwrap();
            prop_assert!(next.is_member(&id));
            prop_assert!(!next.is_pending(&id));
        }
    }
}

// ==================== One collection per identity ====================

proptest! {
    /// Arbitrary mixes of adds, invites, join requests and bans, resolved or
    /// not, never leave an identity in two collections.
    #[test]
    fn insertions_keep_one_collection(
        state in arb_state(),
        inserts in prop::collection::vec((0u8..4, 0u8..ACI_POOL, any::<u8>()), 0..8),
        resolve_first in any::<bool>(),
    ) {
        let mut change = GroupStateChange::new(state.revision + 1);
        for (kind, n, key) in inserts {
            let id = aci(n);
            match kind {
                0 => change
                    .new_members
                    .push(Member::new(id, Role::Default, ProfileKey([key; 32]), change.revision)),
                1 => change
                    .new_pending_members
                    .push(PendingMember::new(id, Role::Default, aci(0), u64::from(key))),
                2 => change
                    .new_requesting_members
                    .push(RequestingMember::new(id, ProfileKey([key; 32]), u64::from(key))),
                _ => change.new_banned_members.push(BannedMember::new(id, u64::from(key))),
            }
        }
        let change = if resolve_first {
            resolve_conflict(&state, &change, CAPACITY)
        } else {
            change
        };

        if let Ok(next) = apply(&state, &change) {
            prop_assert_eq!(next.find_membership_overlap(), None);
        }
    }
}

// ==================== Ban eviction ====================

proptest! {
    /// Evictions remove exactly the oldest bans needed to fit the new ones.
    #[test]
    fn ban_eviction_drops_oldest(
        existing in prop::collection::vec(0u64..6, 0..14),
        new_count in 0usize..4,
        capacity in 1usize..8,
    ) {
        let mut state = GroupState::new(1);
        for (i, at) in existing.iter().enumerate() {
            let id = aci(i as u8);
            state.banned_members.insert(id, BannedMember::new(id, *at));
        }
        let mut change = GroupStateChange::new(2);
        for i in 0..new_count {
            let id = aci(100 + i as u8);
            change.new_banned_members.push(BannedMember::new(id, 10));
        }

        let evicted = ban_evictions(&state, &change, capacity);

        let mut oldest: Vec<(u64, ServiceId)> = state
            .banned_members
            .values()
            .map(|b| (b.banned_at, b.service_id))
            .collect();
        oldest.sort();
        let needed = if new_count == 0 {
            0
        } else {
            (existing.len() + new_count).saturating_sub(capacity).min(existing.len())
        };
        let expected: Vec<ServiceId> = oldest.into_iter().take(needed).map(|(_, id)| id).collect();
        prop_assert_eq!(&evicted, &expected);

        if new_count > 0 && new_count <= capacity {
            let resolved = resolve_conflict(&state, &change, capacity);
            let next = apply(&state, &resolved).unwrap();
            prop_assert!(next.banned_members.len() <= capacity);
            for i in 0..new_count {
                prop_assert!(next.is_banned(&aci(100 + i as u8)));
            }
        }
    }
}

// ==================== Codec ====================

proptest! {
    /// One undecryptable identity becomes UNKNOWN in its own slot; the list
    /// keeps its length and every other entry decrypts.
    #[test]
    fn corrupted_identity_degrades_only_its_slot(
        count in 1usize..8,
        bad_seed in any::<usize>(),
        flip in 0usize..40,
    ) {
        let codec = codec();
        let ids: Vec<ServiceId> = (0..count).map(|_| ServiceId::random_aci()).collect();
        let mut ciphertexts: Vec<Vec<u8>> =
            ids.iter().map(|id| codec.encrypt_identity(id).unwrap()).collect();
        let bad = bad_seed % count;
        let at = flip % ciphertexts[bad].len();
        ciphertexts[bad][at] ^= 0x01;

        let decrypted = codec.decrypt_identities(&ciphertexts);
        prop_assert_eq!(decrypted.len(), count);
        for (i, id) in decrypted.iter().enumerate() {
            if i == bad {
                prop_assert!(id.is_unknown());
            } else {
                prop_assert_eq!(*id, ids[i]);
            }
        }
    }

    /// Any state survives encryption and decryption under its own key.
    #[test]
    fn state_survives_encryption(state in arb_state()) {
        let codec = codec();
        let wire = codec.encrypt_state(&state).unwrap();
        prop_assert_eq!(codec.decrypt_state(&wire).unwrap(), state);
    }
}
