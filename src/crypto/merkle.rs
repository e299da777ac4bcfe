//! Merkle root calculation for block transaction commitments

use super::hash::double_sha256;

/// Calculate the merkle root from a list of transaction hashes
///
/// Odd levels duplicate their last hash, as Bitcoin does.
pub fn calculate_merkle_root(hashes: &[Vec<u8>]) -> Vec<u8> {
    if hashes.is_empty() {
        return vec![0u8; 32];
    }

    let mut current_level: Vec<Vec<u8>> = hashes.to_vec();

    while current_level.len() > 1 {
        let next_level: Vec<Vec<u8>> = current_level
            .chunks(2)
            .map(|chunk| {
                let right = chunk.get(1).unwrap_or(&chunk[0]);
                let mut data = chunk[0].clone();
                data.extend_from_slice(right);
                double_sha256(&data)
            })
            .collect();

        current_level = next_level;
    }

    current_level.remove(0)
}
