pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{
    check_key, check_ring_signature, derive_output_key, derive_output_secret_key,
    deterministic_public_key, generate_key_image, generate_ring_signature,
    identity_point_bytes, key_image_in_prime_subgroup, torsioned_point_bytes, KeyImage,
    KeyPair, PublicKey, RingSignature, SecretKey, Signature,
};
pub use error::NodeError;
pub use hash::Hash256;

pub type Result<T> = std::result::Result<T, NodeError>;
