pub mod encryption;
pub mod signing;

pub use encryption::{
    decrypt_deterministic, decrypt_message, derive_subkey, encrypt_deterministic,
    encrypt_message, generate_key, random_bytes, EncryptionError,
};
pub use signing::{generate_keypair, sign_change, verify_change_signature, SigningError};
