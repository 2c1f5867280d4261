/// Core identity types for the group engine.
///
/// - `ServiceId`: ACI or PNI account identity (UUID based)
/// - `ProfileKey`: 32-byte profile key carried by full and requesting members
/// - `GroupMasterKey`: 32-byte root secret every group key is derived from
/// - `GroupIdentifier`: public 32-byte group handle derived from the master key

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Binary prefix marking a PNI service id.
const PNI_PREFIX: u8 = 0x01;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid service id length: {0}")]
    InvalidLength(usize),

    #[error("Unknown service id prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("Unparseable service id: {0}")]
    Unparseable(String),
}

// ---------------------------------------------------------------------------
// ServiceId
// ---------------------------------------------------------------------------

/// Stable account identity.
///
/// Binary form: an ACI is its 16 raw UUID bytes; a PNI is `0x01 || uuid`.
/// Ordering follows the binary form, which is what every deterministic
/// tie-break in the engine relies on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceId {
    Aci(Uuid),
    Pni(Uuid),
}

impl ServiceId {
    /// Placeholder for an identity whose ciphertext could not be decrypted.
    pub const UNKNOWN: ServiceId = ServiceId::Aci(Uuid::nil());

    /// Random ACI (tests, fixtures).
    pub fn random_aci() -> Self {
        ServiceId::Aci(Uuid::new_v4())
    }

    /// Random PNI (tests, fixtures).
    pub fn random_pni() -> Self {
        ServiceId::Pni(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            ServiceId::Aci(u) | ServiceId::Pni(u) => *u,
        }
    }

    pub fn is_aci(&self) -> bool {
        matches!(self, ServiceId::Aci(_))
    }

    pub fn is_pni(&self) -> bool {
        matches!(self, ServiceId::Pni(_))
    }

    pub fn is_unknown(&self) -> bool {
        *self == ServiceId::UNKNOWN
    }

    /// Binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (buf, len) = self.raw();
        buf[..len].to_vec()
    }

    /// Parse the binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        match bytes.len() {
            16 => Ok(ServiceId::Aci(uuid_from(&bytes[..16]))),
            17 if bytes[0] == PNI_PREFIX => Ok(ServiceId::Pni(uuid_from(&bytes[1..]))),
            17 => Err(IdentityError::UnknownPrefix(bytes[0])),
            n => Err(IdentityError::InvalidLength(n)),
        }
    }

    fn raw(&self) -> ([u8; 17], usize) {
        let mut buf = [0u8; 17];
        match self {
            ServiceId::Aci(u) => {
                buf[..16].copy_from_slice(u.as_bytes());
                (buf, 16)
            }
            ServiceId::Pni(u) => {
                buf[0] = PNI_PREFIX;
                buf[1..].copy_from_slice(u.as_bytes());
                (buf, 17)
            }
        }
    }
}

fn uuid_from(bytes: &[u8]) -> Uuid {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(bytes);
    Uuid::from_bytes(raw)
}

impl Ord for ServiceId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let (a, a_len) = self.raw();
        let (b, b_len) = other.raw();
        a[..a_len].cmp(&b[..b_len])
    }
}

impl PartialOrd for ServiceId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.uuid().simple().to_string();
        match self {
            ServiceId::Aci(_) => write!(f, "Aci({})", &simple[..8]),
            ServiceId::Pni(_) => write!(f, "Pni({})", &simple[..8]),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::Aci(u) => write!(f, "{}", u),
            ServiceId::Pni(u) => write!(f, "PNI:{}", u),
        }
    }
}

impl FromStr for ServiceId {
    type Err = IdentityError;

    /// Accepts `<uuid>` (ACI) or `PNI:<uuid>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (is_pni, raw) = match s.strip_prefix("PNI:") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let uuid = Uuid::parse_str(raw).map_err(|_| IdentityError::Unparseable(s.to_string()))?;
        Ok(if is_pni {
            ServiceId::Pni(uuid)
        } else {
            ServiceId::Aci(uuid)
        })
    }
}

// ---------------------------------------------------------------------------
// ProfileKey
// ---------------------------------------------------------------------------

/// 32-byte profile key.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKey(pub [u8; 32]);

impl ProfileKey {
    pub fn generate() -> Self {
        ProfileKey(crate::crypto::generate_key())
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 32] = bytes.try_into().ok()?;
        Some(ProfileKey(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_matches(&self, other: &ProfileKey) -> bool {
        bool::from(self.0[..].ct_eq(&other.0[..]))
    }
}

impl fmt::Debug for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProfileKey({}..)", hex::encode(&self.0[..4]))
    }
}

// ---------------------------------------------------------------------------
// GroupMasterKey / GroupIdentifier
// ---------------------------------------------------------------------------

/// Root secret of a group. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GroupMasterKey([u8; 32]);

impl GroupMasterKey {
    pub fn generate() -> Self {
        GroupMasterKey(crate::crypto::generate_key())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        GroupMasterKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Public group identifier for this master key.
    pub fn identifier(&self) -> GroupIdentifier {
        GroupIdentifier(blake3::derive_key(
            "ShieldGroups group identifier v1",
            &self.0,
        ))
    }
}

impl fmt::Debug for GroupMasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GroupMasterKey(..)")
    }
}

/// Public group handle. Safe to share with the server.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupIdentifier(pub [u8; 32]);

impl GroupIdentifier {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for GroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupIdentifier({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for GroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
