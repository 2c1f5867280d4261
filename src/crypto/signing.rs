/// Server signatures over encoded group changes.
///
/// The group server signs the CBOR body of every `WireActions` it accepts.
/// Clients that receive a change over an unauthenticated path check that
/// signature before decrypting anything. The signed bytes are prefixed with a
/// fixed domain label.
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

const CHANGE_SIGNATURE_CONTEXT: &[u8] = b"ShieldGroups-ServerChange-v1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Public key is not a valid Ed25519 point")]
    InvalidPublicKey,
    #[error("Signature must be 64 bytes, got {0}")]
    InvalidSignatureLength(usize),
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Generate an Ed25519 keypair
///
/// # Returns
/// (public_key, private_key) - Both as 32-byte arrays
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);
    (
        signing_key.verifying_key().to_bytes(),
        signing_key.to_bytes(),
    )
}

/// Sign an encoded change body the way the group server does.
pub fn sign_change(actions: &[u8], private_key: &[u8; 32]) -> [u8; 64] {
    SigningKey::from_bytes(private_key)
        .sign(&signable(actions))
        .to_bytes()
}

/// Check a server signature over an encoded change body.
///
/// A well-formed signature that does not match is `Ok(false)`; only malformed
/// key or signature bytes are errors.
pub fn verify_change_signature(
    actions: &[u8],
    signature: &[u8],
    public_key: &[u8; 32],
) -> Result<bool> {
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| SigningError::InvalidSignatureLength(signature.len()))?;
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| SigningError::InvalidPublicKey)?;

    Ok(verifying_key
        .verify(&signable(actions), &Signature::from_bytes(&sig_bytes))
        .is_ok())
}

fn signable(actions: &[u8]) -> Vec<u8> {
    [CHANGE_SIGNATURE_CONTEXT, actions].concat()
}
