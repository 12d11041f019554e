//! Common utilities and types shared across chunkmesh

pub mod config;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use hash::{blake3_hash, hash_file, verify_checksum, Blake3Hasher};
pub use utils::{
    encode_name, format_bytes, retry_with_backoff, timestamp_now_millis, unique_name,
    validate_name,
};
