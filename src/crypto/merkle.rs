//! Merkle root over an ordered list of transaction hashes
//!
//! The tree is order-sensitive: an odd-length list folds everything but
//! the last hash into one root and pairs that with the last hash, so
//! reordering transactions changes the root.

use super::hash::{sha256, Hash, HASH_SIZE};

/// Calculate the merkle root of `hashes`, in block order.
///
/// Returns `None` for an empty list.
pub fn calculate_merkle_root(hashes: &[Hash]) -> Option<Hash> {
    match hashes.len() {
        0 => None,
        1 => Some(hashes[0]),
        len if len % 2 == 1 => {
            let head = calculate_merkle_root(&hashes[..len - 1])?;
            calculate_merkle_root(&[head, hashes[len - 1]])
        }
        _ => {
            let level: Vec<Hash> = hashes
                .chunks_exact(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            calculate_merkle_root(&level)
        }
    }
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut data = [0u8; HASH_SIZE * 2];
    data[..HASH_SIZE].copy_from_slice(left);
    data[HASH_SIZE..].copy_from_slice(right);
    sha256(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_merkle_root() {
        assert_eq!(calculate_merkle_root(&[]), None);
    }

    #[test]
    fn test_merkle_root_single() {
        let hashes = [sha256(b"tx1")];
        assert_eq!(calculate_merkle_root(&hashes), Some(hashes[0]));
    }

    #[test]
    fn test_merkle_root_two() {
        let hash1 = sha256(b"tx1");
        let hash2 = sha256(b"tx2");

        let mut expected = hash1.to_vec();
        expected.extend_from_slice(&hash2);

        assert_eq!(
            calculate_merkle_root(&[hash1, hash2]),
            Some(sha256(&expected))
        );
    }

    #[test]
    fn test_merkle_root_odd_folds_prefix() {
        let (h1, h2, h3) = (sha256(b"tx1"), sha256(b"tx2"), sha256(b"tx3"));
        let first_two = hash_pair(&h1, &h2);

        assert_eq!(
            calculate_merkle_root(&[h1, h2, h3]),
            Some(hash_pair(&first_two, &h3))
        );
    }

    #[test]
    fn test_merkle_root_four() {
        let hashes = [sha256(b"a"), sha256(b"b"), sha256(b"c"), sha256(b"d")];
        let left = hash_pair(&hashes[0], &hashes[1]);
        let right = hash_pair(&hashes[2], &hashes[3]);

        assert_eq!(calculate_merkle_root(&hashes), Some(hash_pair(&left, &right)));
    }

    #[test]
    fn test_merkle_root_is_order_sensitive() {
        let hashes = [sha256(b"tx1"), sha256(b"tx2"), sha256(b"tx3")];
        let swapped = [hashes[1], hashes[0], hashes[2]];
        let rotated = [hashes[2], hashes[0], hashes[1]];

        let root = calculate_merkle_root(&hashes);
        assert_eq!(root, calculate_merkle_root(&hashes));
        assert_ne!(root, calculate_merkle_root(&swapped));
        assert_ne!(root, calculate_merkle_root(&rotated));
    }
}
