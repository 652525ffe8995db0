//! 파일 무결성 검증 (SHA-256)

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::Result;

/// SHA-256 다이제스트 크기 (바이트)
pub const HASH_SIZE: usize = 32;

/// 리더 전체를 스트리밍으로 해시
pub async fn hash_reader<R: AsyncRead + Unpin>(reader: &mut R) -> Result<[u8; HASH_SIZE]> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().into())
}

/// 파일 전체 내용 해시
pub async fn hash_file(path: impl AsRef<Path>) -> Result<[u8; HASH_SIZE]> {
    let mut file = File::open(path).await?;
    hash_reader(&mut file).await
}

/// 해시 비교 (길이 확인 후 바이트 단위 비교)
pub fn hashes_match(expected: &[u8], actual: &[u8]) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    expected.iter().zip(actual).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_file_matches_direct_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
        tokio::fs::write(&path, &payload).await.unwrap();

        let hashed = hash_file(&path).await.unwrap();
        let direct: [u8; HASH_SIZE] = Sha256::digest(&payload).into();
        assert_eq!(hashed, direct);
    }

    #[tokio::test]
    async fn test_hash_empty_input() {
        let mut empty: &[u8] = &[];
        let hashed = hash_reader(&mut empty).await.unwrap();
        let direct: [u8; HASH_SIZE] = Sha256::digest(b"").into();
        assert_eq!(hashed, direct);
    }

    #[test]
    fn test_hashes_match_requires_equal_length() {
        assert!(hashes_match(&[1, 2, 3], &[1, 2, 3]));
        assert!(!hashes_match(&[1, 2, 3], &[1, 2]));
        assert!(!hashes_match(&[1, 2, 3], &[1, 2, 4]));
    }
}
