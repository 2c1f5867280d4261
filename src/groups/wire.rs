/// Wire messages exchanged with the group server.
///
/// Everything here is ciphertext or public metadata; the codec is the only
/// place these types meet plaintext. Messages are CBOR maps whose keys are
/// field numbers (`#[serde(rename = "N")]`), so fields can be added without
/// breaking older readers of older messages.
///
/// Decoding fails closed: before deserializing, every key of the message and
/// of every record nested in it is checked against that record's highest known
/// field number. A newer peer's field is never silently dropped.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::groups::limits::{
    HIGHEST_KNOWN_CHANGE_FIELD, HIGHEST_KNOWN_ENVELOPE_FIELD, HIGHEST_KNOWN_STATE_FIELD,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("CBOR encoding failed: {0}")]
    CborEncode(String),

    #[error("CBOR decoding failed: {0}")]
    CborDecode(String),

    #[error("Wire message is not a CBOR map")]
    NotAMap,

    #[error("Unknown field {field} (highest known is {highest})")]
    UnknownField { field: String, highest: u32 },
}

pub type Result<T> = std::result::Result<T, WireError>;

// ---------------------------------------------------------------------------
// Member records
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WireMember {
    #[serde(rename = "1")]
    pub user_id: Vec<u8>,
    #[serde(rename = "2")]
    pub role: u8,
    #[serde(rename = "3")]
    pub profile_key: Vec<u8>,
    #[serde(rename = "4")]
    pub joined_at_revision: u32,
    #[serde(rename = "5", default, skip_serializing_if = "Option::is_none")]
    pub pni: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WirePendingMember {
    #[serde(rename = "1")]
    pub service_id: Vec<u8>,
    #[serde(rename = "2")]
    pub role: u8,
    #[serde(rename = "3")]
    pub added_by: Vec<u8>,
    #[serde(rename = "4")]
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WireRequestingMember {
    #[serde(rename = "1")]
    pub user_id: Vec<u8>,
    #[serde(rename = "2")]
    pub profile_key: Vec<u8>,
    #[serde(rename = "3")]
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WireBannedMember {
    #[serde(rename = "1")]
    pub service_id: Vec<u8>,
    #[serde(rename = "2")]
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireAccessControl {
    #[serde(rename = "1")]
    pub attributes: u8,
    #[serde(rename = "2")]
    pub members: u8,
    #[serde(rename = "3")]
    pub add_from_invite_link: u8,
}

// ---------------------------------------------------------------------------
// Action records
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WireModifyRole {
    #[serde(rename = "1")]
    pub user_id: Vec<u8>,
    #[serde(rename = "2")]
    pub role: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WireModifyProfileKey {
    #[serde(rename = "1")]
    pub user_id: Vec<u8>,
    #[serde(rename = "2")]
    pub profile_key: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WirePromotePending {
    #[serde(rename = "1")]
    pub user_id: Vec<u8>,
    #[serde(rename = "2")]
    pub profile_key: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WirePromoteRequesting {
    #[serde(rename = "1")]
    pub user_id: Vec<u8>,
    #[serde(rename = "2")]
    pub role: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WirePromotePniAci {
    #[serde(rename = "1")]
    pub user_id: Vec<u8>,
    #[serde(rename = "2")]
    pub pni: Vec<u8>,
    #[serde(rename = "3")]
    pub profile_key: Vec<u8>,
}

// ---------------------------------------------------------------------------
// WireActions (the encrypted form of a GroupStateChange)
// ---------------------------------------------------------------------------

/// Encrypted change actions. Field numbers 3..=24 match the order in which
/// the decrypted change is applied.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WireActions {
    #[serde(rename = "1", default, skip_serializing_if = "Option::is_none")]
    pub source_service_id: Option<Vec<u8>>,
    #[serde(rename = "2")]
    pub revision: u32,
    #[serde(rename = "3", default, skip_serializing_if = "Vec::is_empty")]
    pub add_members: Vec<WireMember>,
    #[serde(rename = "4", default, skip_serializing_if = "Vec::is_empty")]
    pub delete_members: Vec<Vec<u8>>,
    #[serde(rename = "5", default, skip_serializing_if = "Vec::is_empty")]
    pub modify_member_roles: Vec<WireModifyRole>,
    #[serde(rename = "6", default, skip_serializing_if = "Vec::is_empty")]
    pub modify_member_profile_keys: Vec<WireModifyProfileKey>,
    #[serde(rename = "7", default, skip_serializing_if = "Vec::is_empty")]
    pub add_pending_members: Vec<WirePendingMember>,
    #[serde(rename = "8", default, skip_serializing_if = "Vec::is_empty")]
    pub delete_pending_members: Vec<Vec<u8>>,
    #[serde(rename = "9", default, skip_serializing_if = "Vec::is_empty")]
    pub promote_pending_members: Vec<WirePromotePending>,
    #[serde(rename = "10", default, skip_serializing_if = "Option::is_none")]
    pub modify_title: Option<Vec<u8>>,
    #[serde(rename = "11", default, skip_serializing_if = "Option::is_none")]
    pub modify_avatar: Option<Vec<u8>>,
    #[serde(rename = "12", default, skip_serializing_if = "Option::is_none")]
    pub modify_disappearing_messages_timer: Option<Vec<u8>>,
    #[serde(rename = "13", default, skip_serializing_if = "Option::is_none")]
    pub modify_attributes_access: Option<u8>,
    #[serde(rename = "14", default, skip_serializing_if = "Option::is_none")]
    pub modify_member_access: Option<u8>,
    #[serde(rename = "15", default, skip_serializing_if = "Option::is_none")]
    pub modify_add_from_invite_link_access: Option<u8>,
    #[serde(rename = "16", default, skip_serializing_if = "Vec::is_empty")]
    pub add_requesting_members: Vec<WireRequestingMember>,
    #[serde(rename = "17", default, skip_serializing_if = "Vec::is_empty")]
    pub delete_requesting_members: Vec<Vec<u8>>,
    #[serde(rename = "18", default, skip_serializing_if = "Vec::is_empty")]
    pub promote_requesting_members: Vec<WirePromoteRequesting>,
    #[serde(rename = "19", default, skip_serializing_if = "Option::is_none")]
    pub modify_invite_link_password: Option<Vec<u8>>,
    #[serde(rename = "20", default, skip_serializing_if = "Option::is_none")]
    pub modify_description: Option<Vec<u8>>,
    #[serde(rename = "21", default, skip_serializing_if = "Option::is_none")]
    pub modify_announcements_only: Option<bool>,
    #[serde(rename = "22", default, skip_serializing_if = "Vec::is_empty")]
    pub add_banned_members: Vec<WireBannedMember>,
    #[serde(rename = "23", default, skip_serializing_if = "Vec::is_empty")]
    pub delete_banned_members: Vec<Vec<u8>>,
    #[serde(rename = "24", default, skip_serializing_if = "Vec::is_empty")]
    pub promote_pending_pni_aci_members: Vec<WirePromotePniAci>,
}

// ---------------------------------------------------------------------------
// WireGroupState / WireGroupChange
// ---------------------------------------------------------------------------

/// Encrypted full-state snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WireGroupState {
    /// Public group identifier.
    #[serde(rename = "1")]
    pub group_id: Vec<u8>,
    #[serde(rename = "2")]
    pub title: Vec<u8>,
    #[serde(rename = "3")]
    pub avatar: Vec<u8>,
    #[serde(rename = "4")]
    pub disappearing_messages_timer: Vec<u8>,
    #[serde(rename = "5")]
    pub access_control: WireAccessControl,
    #[serde(rename = "6")]
    pub revision: u32,
    #[serde(rename = "7", default)]
    pub members: Vec<WireMember>,
    #[serde(rename = "8", default)]
    pub pending_members: Vec<WirePendingMember>,
    #[serde(rename = "9", default)]
    pub requesting_members: Vec<WireRequestingMember>,
    #[serde(rename = "10")]
    pub invite_link_password: Vec<u8>,
    #[serde(rename = "11")]
    pub description: Vec<u8>,
    #[serde(rename = "12", default)]
    pub announcements_only: bool,
    #[serde(rename = "13", default)]
    pub banned_members: Vec<WireBannedMember>,
}

/// Server-delivered change: serialized `WireActions`, the server's signature
/// over them, and the protocol epoch they were written for.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WireGroupChange {
    #[serde(rename = "1")]
    pub actions: Vec<u8>,
    #[serde(rename = "2", default)]
    pub server_signature: Vec<u8>,
    #[serde(rename = "3")]
    pub change_epoch: u32,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Field layout of one wire record: its highest known field number, and the
/// layout of every field that holds a record or a list of records.
#[derive(Debug)]
pub struct FieldSchema {
    pub highest: u32,
    pub nested: &'static [(u32, &'static FieldSchema)],
}

impl FieldSchema {
    const fn flat(highest: u32) -> Self {
        Self {
            highest,
            nested: &[],
        }
    }

    fn nested_at(&self, field: u32) -> Option<&'static FieldSchema> {
        self.nested
            .iter()
            .find(|(number, _)| *number == field)
            .map(|(_, schema)| *schema)
    }
}

pub const MEMBER_SCHEMA: FieldSchema = FieldSchema::flat(5);
pub const PENDING_MEMBER_SCHEMA: FieldSchema = FieldSchema::flat(4);
pub const REQUESTING_MEMBER_SCHEMA: FieldSchema = FieldSchema::flat(3);
pub const BANNED_MEMBER_SCHEMA: FieldSchema = FieldSchema::flat(2);
pub const ACCESS_CONTROL_SCHEMA: FieldSchema = FieldSchema::flat(3);
pub const MODIFY_ROLE_SCHEMA: FieldSchema = FieldSchema::flat(2);
pub const MODIFY_PROFILE_KEY_SCHEMA: FieldSchema = FieldSchema::flat(2);
pub const PROMOTE_PENDING_SCHEMA: FieldSchema = FieldSchema::flat(2);
pub const PROMOTE_REQUESTING_SCHEMA: FieldSchema = FieldSchema::flat(2);
pub const PROMOTE_PNI_ACI_SCHEMA: FieldSchema = FieldSchema::flat(3);

pub const ACTIONS_SCHEMA: FieldSchema = FieldSchema {
    highest: HIGHEST_KNOWN_CHANGE_FIELD,
    nested: &[
        (3, &MEMBER_SCHEMA),
        (5, &MODIFY_ROLE_SCHEMA),
        (6, &MODIFY_PROFILE_KEY_SCHEMA),
        (7, &PENDING_MEMBER_SCHEMA),
        (9, &PROMOTE_PENDING_SCHEMA),
        (16, &REQUESTING_MEMBER_SCHEMA),
        (18, &PROMOTE_REQUESTING_SCHEMA),
        (22, &BANNED_MEMBER_SCHEMA),
        (24, &PROMOTE_PNI_ACI_SCHEMA),
    ],
};

pub const STATE_SCHEMA: FieldSchema = FieldSchema {
    highest: HIGHEST_KNOWN_STATE_FIELD,
    nested: &[
        (5, &ACCESS_CONTROL_SCHEMA),
        (7, &MEMBER_SCHEMA),
        (8, &PENDING_MEMBER_SCHEMA),
        (9, &REQUESTING_MEMBER_SCHEMA),
        (13, &BANNED_MEMBER_SCHEMA),
    ],
};

// Field 1 carries encoded `WireActions` bytes, checked when they are decoded.
pub const ENVELOPE_SCHEMA: FieldSchema = FieldSchema::flat(HIGHEST_KNOWN_ENVELOPE_FIELD);

/// A top-level wire message with a fixed field layout.
pub trait WireMessage: Serialize + DeserializeOwned {
    const SCHEMA: &'static FieldSchema;

    fn encode(&self) -> Result<Vec<u8>> {
        cbor_encode(self)
    }

    /// Decode, rejecting any field number the schema does not know, at any depth.
    fn decode(bytes: &[u8]) -> Result<Self> {
        check_known_fields(bytes, Self::SCHEMA)?;
        cbor_decode(bytes)
    }
}

impl WireMessage for WireActions {
    const SCHEMA: &'static FieldSchema = &ACTIONS_SCHEMA;
}

impl WireMessage for WireGroupState {
    const SCHEMA: &'static FieldSchema = &STATE_SCHEMA;
}

impl WireMessage for WireGroupChange {
    const SCHEMA: &'static FieldSchema = &ENVELOPE_SCHEMA;
}

/// CBOR-encode a value.
pub fn cbor_encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| WireError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// CBOR-decode a value from bytes.
pub fn cbor_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| WireError::CborDecode(e.to_string()))
}

/// Fail closed on any key, top-level or nested, that is not a field number
/// known to its record's schema.
pub fn check_known_fields(bytes: &[u8], schema: &FieldSchema) -> Result<()> {
    let value: ciborium::Value = cbor_decode(bytes)?;
    match &value {
        ciborium::Value::Map(entries) => check_record(entries, schema),
        _ => Err(WireError::NotAMap),
    }
}

fn check_record(entries: &[(ciborium::Value, ciborium::Value)], schema: &FieldSchema) -> Result<()> {
    for (key, value) in entries {
        let field = field_number(key)
            .filter(|n| *n <= schema.highest)
            .ok_or_else(|| WireError::UnknownField {
                field: describe_key(key),
                highest: schema.highest,
            })?;

        if let Some(inner) = schema.nested_at(field) {
            check_nested(value, inner).map_err(|e| match e {
                WireError::UnknownField { field: child, highest } => WireError::UnknownField {
                    field: format!("{}.{}", field, child),
                    highest,
                },
                other => other,
            })?;
        }
    }
    Ok(())
}

/// Read the epoch (field 3) of an encoded `WireGroupChange` without checking
/// its other fields, so a future envelope can be recognised before it is
/// rejected as unknown.
pub fn peek_change_epoch(bytes: &[u8]) -> Result<Option<u32>> {
    let value: ciborium::Value = cbor_decode(bytes)?;
    let entries = value.as_map().ok_or(WireError::NotAMap)?;
    Ok(entries
        .iter()
        .find(|(key, _)| field_number(key) == Some(3))
        .and_then(|(_, epoch)| epoch.as_integer())
        .and_then(|epoch| u32::try_from(epoch).ok()))
}

fn field_number(key: &ciborium::Value) -> Option<u32> {
    match key {
        ciborium::Value::Text(text) => text.parse::<u32>().ok(),
        ciborium::Value::Integer(int) => u32::try_from(*int).ok(),
        _ => None,
    }
}

// Shape mismatches are left for deserialization to report.
fn check_nested(value: &ciborium::Value, schema: &FieldSchema) -> Result<()> {
    match value {
        ciborium::Value::Map(entries) => check_record(entries, schema),
        ciborium::Value::Array(items) => items.iter().try_for_each(|item| match item {
            ciborium::Value::Map(entries) => check_record(entries, schema),
            _ => Ok(()),
        }),
        _ => Ok(()),
    }
}

fn describe_key(key: &ciborium::Value) -> String {
    match key {
        ciborium::Value::Text(text) => text.clone(),
        ciborium::Value::Integer(int) => i128::from(*int).to_string(),
        other => format!("{:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
