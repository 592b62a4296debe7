// Merkle root calculation for batches of transaction hashes

use crate::crypto::{hash, Hash};
use sha2::{Digest, Sha256};

/// Calculate the merkle root of a list of system hashes.
///
/// This builds a binary tree where:
/// - Leaves are the handle strings as given (callers sort them first
///   so the commitment does not depend on batch order)
/// - Parent nodes are SHA256(left || right) over the string forms
/// - An odd node count at any level duplicates the last element
///
/// An empty list yields SHA256 of the empty string. The sealing path
/// never produces one, the case is defined for uniformity.
pub fn merkle_root<S: AsRef<str>>(leaves: &[S]) -> Hash {
    if leaves.is_empty() {
        return hash(b"");
    }

    let mut level: Vec<String> = leaves.iter().map(|leaf| leaf.as_ref().to_owned()).collect();

    // Build the tree bottom-up; a single leaf pairs with itself
    loop {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            let left = &chunk[0];
            let right = chunk.get(1).unwrap_or(&chunk[0]);
            next.push(hash_pair(left, right));
        }

        if next.len() == 1 {
            return next.remove(0);
        }
        level = next.into_iter().map(|node| node.to_hex()).collect();
    }
}

/// Hash a pair of nodes
fn hash_pair(left: &str, right: &str) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash::new(hasher.finalize().into())
}
