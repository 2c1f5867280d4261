/// Decrypted group state, one revisioned snapshot per group.
///
/// `GroupState` is a plain value: every transition (see `apply`) produces a
/// new snapshot and never edits one in place, so a cached state can be shared
/// freely between readers. All identity-keyed collections are `BTreeMap`s so
/// iteration, equality, and hashing are order-independent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::groups::ids::{ProfileKey, ServiceId};

// ---------------------------------------------------------------------------
// Role, AccessRequired, AccessControl
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Role {
    #[default]
    Default = 1,
    Administrator = 2,
}

/// Who may perform an action.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AccessRequired {
    Any = 1,
    Member = 2,
    Administrator = 3,
    Unsatisfiable = 4,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessControl {
    /// Editing title, avatar, description, timer.
    pub attributes: AccessRequired,
    /// Adding members.
    pub members: AccessRequired,
    /// Joining via invite link.
    pub add_from_invite_link: AccessRequired,
}

impl Default for AccessControl {
    fn default() -> Self {
        AccessControl {
            attributes: AccessRequired::Member,
            members: AccessRequired::Member,
            add_from_invite_link: AccessRequired::Unsatisfiable,
        }
    }
}

// ---------------------------------------------------------------------------
// Member entries
// ---------------------------------------------------------------------------

/// Full member, keyed by ACI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Member {
    pub aci: ServiceId,
    /// PNI the member was invited under, when promoted from a PNI invite.
    pub pni: Option<ServiceId>,
    pub role: Role,
    pub profile_key: ProfileKey,
    pub joined_at_revision: u32,
}

impl Member {
    pub fn new(aci: ServiceId, role: Role, profile_key: ProfileKey, joined_at_revision: u32) -> Self {
        Member {
            aci,
            pni: None,
            role,
            profile_key,
            joined_at_revision,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }
}

/// Invited but not yet accepted. Keyed by ACI or PNI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PendingMember {
    pub service_id: ServiceId,
    pub role: Role,
    pub invited_by: ServiceId,
    /// Milliseconds since Unix epoch.
    pub invited_at: u64,
}

impl PendingMember {
    pub fn new(service_id: ServiceId, role: Role, invited_by: ServiceId, invited_at: u64) -> Self {
        PendingMember {
            service_id,
            role,
            invited_by,
            invited_at,
        }
    }
}

/// Asked to join via invite link, awaiting admin approval. Keyed by ACI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestingMember {
    pub aci: ServiceId,
    pub profile_key: ProfileKey,
    /// Milliseconds since Unix epoch.
    pub requested_at: u64,
}

impl RequestingMember {
    pub fn new(aci: ServiceId, profile_key: ProfileKey, requested_at: u64) -> Self {
        RequestingMember {
            aci,
            profile_key,
            requested_at,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BannedMember {
    pub service_id: ServiceId,
    /// Milliseconds since Unix epoch.
    pub banned_at: u64,
}

impl BannedMember {
    pub fn new(service_id: ServiceId, banned_at: u64) -> Self {
        BannedMember {
            service_id,
            banned_at,
        }
    }
}

/// Which collection an identity currently belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    Full,
    Pending,
    Requesting,
    Banned,
}

// ---------------------------------------------------------------------------
// GroupState
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupState {
    pub revision: u32,
    pub title: String,
    pub description: String,
    /// Opaque avatar reference (CDN key).
    pub avatar: String,
    /// Zero means disabled. Second granularity on the wire.
    pub disappearing_messages_timer: Duration,
    pub access_control: AccessControl,
    pub announcements_only: bool,
    pub members: BTreeMap<ServiceId, Member>,
    pub pending_members: BTreeMap<ServiceId, PendingMember>,
    pub requesting_members: BTreeMap<ServiceId, RequestingMember>,
    pub banned_members: BTreeMap<ServiceId, BannedMember>,
    pub invite_link_password: Vec<u8>,
}

impl GroupState {
    /// Create an empty state at the given revision.
    pub fn new(revision: u32) -> Self {
        GroupState {
            revision,
            ..Default::default()
        }
    }

    pub fn member(&self, aci: &ServiceId) -> Option<&Member> {
        self.members.get(aci)
    }

    pub fn is_member(&self, aci: &ServiceId) -> bool {
        self.members.contains_key(aci)
    }

    pub fn is_admin(&self, aci: &ServiceId) -> bool {
        self.members.get(aci).map(Member::is_admin).unwrap_or(false)
    }

    pub fn is_pending(&self, service_id: &ServiceId) -> bool {
        self.pending_members.contains_key(service_id)
    }

    pub fn is_requesting(&self, aci: &ServiceId) -> bool {
        self.requesting_members.contains_key(aci)
    }

    pub fn is_banned(&self, service_id: &ServiceId) -> bool {
        self.banned_members.contains_key(service_id)
    }

    /// Every collection the identity currently appears in, in field order.
    pub fn memberships(&self, service_id: &ServiceId) -> Vec<Membership> {
        let mut found = Vec::new();
        if self.is_member(service_id) {
            found.push(Membership::Full);
        }
        if self.is_pending(service_id) {
            found.push(Membership::Pending);
        }
        if self.is_requesting(service_id) {
            found.push(Membership::Requesting);
        }
        if self.is_banned(service_id) {
            found.push(Membership::Banned);
        }
        found
    }

    /// First identity that appears in more than one collection, if any.
    pub fn find_membership_overlap(&self) -> Option<ServiceId> {
        self.members
            .keys()
            .chain(self.pending_members.keys())
            .chain(self.requesting_members.keys())
            .find(|id| self.memberships(id).len() > 1)
            .copied()
    }

    pub fn admins(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| m.is_admin())
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Deterministic state hash for convergence checks between devices.
    ///
    /// Collections are hashed in `BTreeMap` order; enum discriminants use their
    /// stable `#[repr(u8)]` values.
    pub fn state_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();

        hasher.update(b"R");
        hasher.update(&self.revision.to_le_bytes());

        hasher.update(b"A");
        for field in [&self.title, &self.description, &self.avatar] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(&self.disappearing_messages_timer.as_secs().to_le_bytes());
        hasher.update(&[
            self.access_control.attributes as u8,
            self.access_control.members as u8,
            self.access_control.add_from_invite_link as u8,
            self.announcements_only as u8,
        ]);
        hasher.update(&(self.invite_link_password.len() as u64).to_le_bytes());
        hasher.update(&self.invite_link_password);

        hasher.update(b"M");
        for (aci, m) in &self.members {
            hasher.update(&aci.to_bytes());
            hasher.update(&m.pni.map(|p| p.to_bytes()).unwrap_or_default());
            hasher.update(&[m.role as u8]);
            hasher.update(m.profile_key.as_bytes());
            hasher.update(&m.joined_at_revision.to_le_bytes());
        }

        hasher.update(b"P");
        for (id, p) in &self.pending_members {
            hasher.update(&id.to_bytes());
            hasher.update(&[p.role as u8]);
            hasher.update(&p.invited_by.to_bytes());
            hasher.update(&p.invited_at.to_le_bytes());
        }

        hasher.update(b"Q");
        for (aci, r) in &self.requesting_members {
            hasher.update(&aci.to_bytes());
            hasher.update(r.profile_key.as_bytes());
            hasher.update(&r.requested_at.to_le_bytes());
        }

        hasher.update(b"B");
        for (id, b) in &self.banned_members {
            hasher.update(&id.to_bytes());
            hasher.update(&b.banned_at.to_le_bytes());
        }

        *hasher.finalize().as_bytes()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
