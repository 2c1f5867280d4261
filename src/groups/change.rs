/// `GroupStateChange`: a sparse, decrypted delta between two revisions.
///
/// Fields are listed in wire field-number order (3..=24), which is also the
/// order in which they are applied. Scalar edits are `Option`s so that
/// "not changed" stays distinguishable from "changed to the empty value";
/// list edits are empty when absent.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::groups::ids::{ProfileKey, ServiceId};
use crate::groups::state::{AccessRequired, BannedMember, Member, PendingMember, RequestingMember, Role};

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoleChange {
    pub aci: ServiceId,
    pub role: Role,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProfileKeyChange {
    pub aci: ServiceId,
    pub profile_key: ProfileKey,
}

/// Pending member accepting their invite. Role comes from the invite;
/// `joined_at_revision` is the change's revision.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PendingPromotion {
    pub aci: ServiceId,
    pub profile_key: ProfileKey,
}

/// Admin approving a join request. Profile key comes from the request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestApproval {
    pub aci: ServiceId,
    pub role: Role,
}

/// Member invited by PNI accepting under their ACI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PniPromotion {
    pub aci: ServiceId,
    pub pni: ServiceId,
    pub profile_key: ProfileKey,
}

// ---------------------------------------------------------------------------
// GroupStateChange
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupStateChange {
    /// Who authored the change. `None` when unknown (e.g. reconstructed locally).
    pub editor: Option<ServiceId>,
    /// Revision the group is at once this change is applied.
    pub revision: u32,

    pub new_members: Vec<Member>,
    pub delete_members: Vec<ServiceId>,
    pub modify_member_roles: Vec<RoleChange>,
    pub modify_profile_keys: Vec<ProfileKeyChange>,
    pub new_pending_members: Vec<PendingMember>,
    pub delete_pending_members: Vec<ServiceId>,
    pub promote_pending_members: Vec<PendingPromotion>,
    pub new_title: Option<String>,
    pub new_avatar: Option<String>,
    pub new_timer: Option<Duration>,
    pub new_attribute_access: Option<AccessRequired>,
    pub new_member_access: Option<AccessRequired>,
    pub new_invite_link_access: Option<AccessRequired>,
    pub new_requesting_members: Vec<RequestingMember>,
    pub delete_requesting_members: Vec<ServiceId>,
    pub promote_requesting_members: Vec<RequestApproval>,
    pub new_invite_link_password: Option<Vec<u8>>,
    pub new_description: Option<String>,
    pub new_announcements_only: Option<bool>,
    pub new_banned_members: Vec<BannedMember>,
    pub delete_banned_members: Vec<ServiceId>,
    pub promote_pending_pni_aci_members: Vec<PniPromotion>,
}

impl GroupStateChange {
    /// Empty change targeting `revision`.
    pub fn new(revision: u32) -> Self {
        GroupStateChange {
            revision,
            ..Default::default()
        }
    }

    pub fn with_editor(mut self, editor: ServiceId) -> Self {
        self.editor = Some(editor);
        self
    }

    /// True when the change carries no mutation at all. `editor` and
    /// `revision` are bookkeeping and do not count.
    pub fn is_empty(&self) -> bool {
        self.new_members.is_empty()
            && self.delete_members.is_empty()
            && self.modify_member_roles.is_empty()
            && self.modify_profile_keys.is_empty()
            && self.new_pending_members.is_empty()
            && self.delete_pending_members.is_empty()
            && self.promote_pending_members.is_empty()
            && self.new_title.is_none()
            && self.new_avatar.is_none()
            && self.new_timer.is_none()
            && self.new_attribute_access.is_none()
            && self.new_member_access.is_none()
            && self.new_invite_link_access.is_none()
            && self.new_requesting_members.is_empty()
            && self.delete_requesting_members.is_empty()
            && self.promote_requesting_members.is_empty()
            && self.new_invite_link_password.is_none()
            && self.new_description.is_none()
            && self.new_announcements_only.is_none()
            && self.new_banned_members.is_empty()
            && self.delete_banned_members.is_empty()
            && self.promote_pending_pni_aci_members.is_empty()
    }

    /// True when the change touches nothing but the member's own profile key,
    /// the one edit any member may make for themselves.
    pub fn is_profile_key_only(&self) -> bool {
        if self.modify_profile_keys.len() != 1 {
            return false;
        }
        let mut rest = self.clone();
        rest.modify_profile_keys.clear();
        rest.is_empty()
    }

    /// Number of individual mutations carried.
    pub fn action_count(&self) -> usize {
        let scalars = [
            self.new_title.is_some(),
            self.new_avatar.is_some(),
            self.new_timer.is_some(),
            self.new_attribute_access.is_some(),
            self.new_member_access.is_some(),
            self.new_invite_link_access.is_some(),
            self.new_invite_link_password.is_some(),
            self.new_description.is_some(),
            self.new_announcements_only.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        scalars
            + self.new_members.len()
            + self.delete_members.len()
            + self.modify_member_roles.len()
            + self.modify_profile_keys.len()
            + self.new_pending_members.len()
            + self.delete_pending_members.len()
            + self.promote_pending_members.len()
            + self.new_requesting_members.len()
            + self.delete_requesting_members.len()
            + self.promote_requesting_members.len()
            + self.new_banned_members.len()
            + self.delete_banned_members.len()
            + self.promote_pending_pni_aci_members.len()
    }
}
