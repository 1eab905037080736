//! Segment merkle trees over stored files.
//!
//! A file is split into fixed 64-byte segments, each hashed into a leaf; a
//! short final segment is zero-padded before hashing. Sibling-less nodes
//! pair with `ZERO_HASH`, so a proof for segment `i` is the list of sibling
//! hashes from leaf to root, with the direction at each level given by the
//! bits of `i`.

use silo_hashes::{Hash, Hasher, ZERO_HASH};
use std::io::Read;
use thiserror::Error;

/// Size of a file segment, the leaf unit of storage proofs.
pub const SEGMENT_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum MerkleError {
    #[error("segment index {index} out of bounds for {segments} segments")]
    IndexOutOfBounds { index: u64, segments: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The number of segments in a file of `file_size` bytes.
pub fn segment_count(file_size: u64) -> u64 {
    file_size.div_ceil(SEGMENT_SIZE as u64)
}

/// The number of sibling hashes a proof for a tree of `segments` leaves
/// carries.
pub fn proof_len(segments: u64) -> usize {
    if segments <= 1 {
        return 0;
    }
    segments.next_power_of_two().trailing_zeros() as usize
}

fn leaf_hash(segment: &[u8; SEGMENT_SIZE]) -> Hash {
    Hasher::new().update([0u8]).update(segment).finalize()
}

fn node_hash(left: Hash, right: Hash) -> Hash {
    Hasher::new().update([1u8]).update(left).update(right).finalize()
}

/// Reads the next zero-padded segment, `None` at EOF.
fn read_segment(reader: &mut impl Read) -> std::io::Result<Option<[u8; SEGMENT_SIZE]>> {
    let mut segment = [0u8; SEGMENT_SIZE];
    let mut filled = 0;
    while filled < SEGMENT_SIZE {
        let n = reader.read(&mut segment[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    Ok(Some(segment))
}

fn read_leaves(reader: &mut impl Read) -> std::io::Result<(Vec<Hash>, Vec<[u8; SEGMENT_SIZE]>)> {
    let mut leaves = Vec::new();
    let mut segments = Vec::new();
    while let Some(segment) = read_segment(reader)? {
        leaves.push(leaf_hash(&segment));
        segments.push(segment);
    }
    Ok((leaves, segments))
}

fn levels_of(mut level: Vec<Hash>) -> Vec<Vec<Hash>> {
    let mut levels = Vec::new();
    loop {
        let done = level.len() <= 1;
        levels.push(level);
        if done {
            return levels;
        }
        let prev = levels.last().unwrap();
        level = prev.chunks(2).map(|pair| node_hash(pair[0], pair.get(1).copied().unwrap_or(ZERO_HASH))).collect();
    }
}

fn root_of(leaves: Vec<Hash>) -> Hash {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    *levels_of(leaves).last().unwrap().first().unwrap()
}

/// The merkle root of the segments read from `reader`.
pub fn reader_root(reader: &mut impl Read) -> Result<Hash, MerkleError> {
    let mut leaves = Vec::new();
    while let Some(segment) = read_segment(reader)? {
        leaves.push(leaf_hash(&segment));
    }
    Ok(root_of(leaves))
}

/// Builds the proof for the segment at `index`: the zero-padded segment
/// bytes plus the sibling hashes authenticating it against the root.
pub fn build_reader_proof(
    reader: &mut impl Read,
    index: u64,
) -> Result<([u8; SEGMENT_SIZE], Vec<Hash>), MerkleError> {
    let (leaves, segments) = read_leaves(reader)?;
    let count = leaves.len() as u64;
    if index >= count {
        return Err(MerkleError::IndexOutOfBounds { index, segments: count });
    }

    let levels = levels_of(leaves);
    let mut hash_set = Vec::with_capacity(proof_len(count));
    let mut position = index as usize;
    for level in &levels[..levels.len() - 1] {
        let sibling = position ^ 1;
        hash_set.push(level.get(sibling).copied().unwrap_or(ZERO_HASH));
        position /= 2;
    }
    Ok((segments[index as usize], hash_set))
}

/// Verifies that `segment` is the `index`-th leaf of a `segments`-leaf tree
/// with the given root.
pub fn verify_segment(segment: &[u8], hash_set: &[Hash], segments: u64, index: u64, root: Hash) -> bool {
    if segment.len() != SEGMENT_SIZE || index >= segments || hash_set.len() != proof_len(segments) {
        return false;
    }
    let mut current = leaf_hash(segment.try_into().expect("length checked above"));
    let mut position = index;
    for &sibling in hash_set {
        current = if position % 2 == 0 { node_hash(current, sibling) } else { node_hash(sibling, current) };
        position /= 2;
    }
    current == root
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn file_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn empty_reader_has_zero_root() {
        assert_eq!(reader_root(&mut Cursor::new(&[])).unwrap(), ZERO_HASH);
        assert!(build_reader_proof(&mut Cursor::new(&[]), 0).is_err());
    }

    #[test]
    fn single_segment_root_is_its_leaf() {
        let data = file_of(SEGMENT_SIZE);
        let root = reader_root(&mut Cursor::new(&data)).unwrap();
        let (segment, hash_set) = build_reader_proof(&mut Cursor::new(&data), 0).unwrap();
        assert!(hash_set.is_empty());
        assert_eq!(&segment[..], &data[..]);
        assert!(verify_segment(&segment, &hash_set, 1, 0, root));
    }

    #[test]
    fn short_final_segment_is_zero_padded() {
        let data = file_of(SEGMENT_SIZE + 10);
        let root = reader_root(&mut Cursor::new(&data)).unwrap();
        let (segment, hash_set) = build_reader_proof(&mut Cursor::new(&data), 1).unwrap();
        assert_eq!(&segment[..10], &data[SEGMENT_SIZE..]);
        assert!(segment[10..].iter().all(|&b| b == 0));
        assert!(verify_segment(&segment, &hash_set, 2, 1, root));
    }

    #[test]
    fn proofs_verify_for_every_index() {
        for segments in [1usize, 2, 3, 5, 8, 13, 64] {
            let data = file_of(segments * SEGMENT_SIZE - 7);
            let root = reader_root(&mut Cursor::new(&data)).unwrap();
            for index in 0..segment_count(data.len() as u64) {
                let (segment, hash_set) = build_reader_proof(&mut Cursor::new(&data), index).unwrap();
                assert_eq!(hash_set.len(), proof_len(segments as u64));
                assert!(verify_segment(&segment, &hash_set, segments as u64, index, root), "index {index} of {segments}");
            }
        }
    }

    #[test]
    fn tampering_fails_verification() {
        let data = file_of(5 * SEGMENT_SIZE);
        let root = reader_root(&mut Cursor::new(&data)).unwrap();
        let (mut segment, hash_set) = build_reader_proof(&mut Cursor::new(&data), 2).unwrap();

        segment[0] ^= 1;
        assert!(!verify_segment(&segment, &hash_set, 5, 2, root));
        segment[0] ^= 1;
        assert!(verify_segment(&segment, &hash_set, 5, 2, root));

        // Wrong index, wrong root, truncated hash set.
        assert!(!verify_segment(&segment, &hash_set, 5, 3, root));
        assert!(!verify_segment(&segment, &hash_set, 5, 2, Hash::from_u64(1)));
        assert!(!verify_segment(&segment, &hash_set[..hash_set.len() - 1], 5, 2, root));
    }
}
