/// Protocol constants for the group engine.
///
/// The "highest known" values must be bumped in lockstep with any new wire
/// field or change epoch; anything above them is rejected rather than
/// silently dropped.

/// Highest change epoch this build understands.
pub const HIGHEST_KNOWN_EPOCH: u32 = 5;

/// Highest field number in `WireActions`.
pub const HIGHEST_KNOWN_CHANGE_FIELD: u32 = 24;

/// Highest field number in `WireGroupState`.
pub const HIGHEST_KNOWN_STATE_FIELD: u32 = 13;

/// Highest field number in `WireGroupChange`.
pub const HIGHEST_KNOWN_ENVELOPE_FIELD: u32 = 3;

/// Default number of banned members a group keeps before evicting the oldest.
pub const DEFAULT_BANNED_MEMBER_CAPACITY: usize = 10;

/// Default invite-link password length in bytes.
pub const DEFAULT_INVITE_LINK_PASSWORD_LEN: usize = 16;

/// Version byte prefixed to every encrypted attribute blob.
pub const BLOB_VERSION: u8 = 0x00;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_ceilings_are_consistent() {
        assert!(HIGHEST_KNOWN_CHANGE_FIELD > HIGHEST_KNOWN_STATE_FIELD);
        assert!(HIGHEST_KNOWN_ENVELOPE_FIELD >= 3);
        assert!(DEFAULT_BANNED_MEMBER_CAPACITY > 0);
    }
}
