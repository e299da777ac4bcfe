//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 / double SHA-256 hashing
//! - Merkle root calculation

pub mod hash;
pub mod merkle;

pub use hash::{double_sha256, double_sha256_hex, sha256, sha256_hex};
pub use merkle::calculate_merkle_root;
