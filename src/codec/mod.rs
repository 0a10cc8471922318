//! Integer encodings shared with the circuit's decoding logic.

pub mod limbs;
pub mod packing;

pub use limbs::{
    base64url_to_limbs, biguint_to_limbs, bytes_to_limbs, bytes_to_limbs_fixed, digest_to_limbs,
    limbs_to_biguint,
};
pub use packing::{pack_bytes_fixed, pack_string, unpack_string};
