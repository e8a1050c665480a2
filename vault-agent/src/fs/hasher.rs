//! Content hashing for manifest entries.
//!
//! File digests are computed in bounded chunks so memory use does not depend
//! on file size.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer for streaming digests (4KB)
const HASH_CHUNK_SIZE: usize = 4 * 1024;

/// Leaf size of the store's SHA-256 tree hash (1MB)
const TREE_HASH_LEAF_SIZE: usize = 1024 * 1024;

/// Compute the hex-encoded SHA-256 of a file's full content.
///
/// Fails if the file cannot be opened or a read fails mid-stream; no partial
/// digest is ever returned.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hex-encoded SHA-256 of an in-memory buffer.
pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 tree hash, the checksum archive stores compute on upload.
///
/// The data is split into 1MB leaves; adjacent digests are concatenated and
/// hashed level by level, an odd digest is carried up unchanged. For inputs of
/// at most one leaf this equals the plain SHA-256.
pub fn tree_hash(data: &[u8]) -> String {
    if data.is_empty() {
        return sha256_bytes(data);
    }

    let mut level: Vec<[u8; 32]> = data
        .chunks(TREE_HASH_LEAF_SIZE)
        .map(|leaf| Sha256::digest(leaf).into())
        .collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => {
                    let mut hasher = Sha256::new();
                    hasher.update(left);
                    hasher.update(right);
                    hasher.finalize().into()
                }
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two digests"),
            })
            .collect();
    }

    hex::encode(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_known_digest() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("hello.txt");
        fs::write(&path, b"hello")?;

        assert_eq!(sha256_file(&path)?, HELLO_SHA256);
        assert_eq!(sha256_bytes(b"hello"), HELLO_SHA256);
        Ok(())
    }

    #[test]
    fn test_same_content_different_paths() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let content = vec![7u8; HASH_CHUNK_SIZE * 3 + 17];
        fs::write(temp_dir.path().join("one.bin"), &content)?;
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested/two.bin"), &content)?;

        let first = sha256_file(&temp_dir.path().join("one.bin"))?;
        let second = sha256_file(&temp_dir.path().join("nested/two.bin"))?;
        assert_eq!(first, second);
        assert_eq!(first, sha256_bytes(&content));
        Ok(())
    }

    #[test]
    fn test_single_byte_change() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("data.bin");
        let mut content = vec![0u8; 10_000];
        fs::write(&path, &content)?;
        let before = sha256_file(&path)?;

        content[5_000] = 1;
        fs::write(&path, &content)?;
        assert_ne!(before, sha256_file(&path)?);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let err = sha256_file(Path::new("/definitely/not/here.bin")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_tree_hash_small_input_is_plain_sha256() {
        assert_eq!(tree_hash(b"hello"), HELLO_SHA256);
        assert_eq!(tree_hash(b""), sha256_bytes(b""));
    }

    #[test]
    fn test_tree_hash_multiple_leaves() {
        let data: Vec<u8> = (0..TREE_HASH_LEAF_SIZE * 2 + 10).map(|i| (i % 251) as u8).collect();

        let a: [u8; 32] = Sha256::digest(&data[..TREE_HASH_LEAF_SIZE]).into();
        let b: [u8; 32] = Sha256::digest(&data[TREE_HASH_LEAF_SIZE..TREE_HASH_LEAF_SIZE * 2]).into();
        let c: [u8; 32] = Sha256::digest(&data[TREE_HASH_LEAF_SIZE * 2..]).into();
        let mut ab = Sha256::new();
        ab.update(a);
        ab.update(b);
        let ab: [u8; 32] = ab.finalize().into();
        let mut root = Sha256::new();
        root.update(ab);
        root.update(c);

        assert_eq!(tree_hash(&data), hex::encode(root.finalize()));
        assert_ne!(tree_hash(&data), sha256_bytes(&data));
    }
}
