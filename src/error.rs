//! 에러 타입 정의

use thiserror::Error;

use crate::packet::PacketType;

/// RUDP 전송 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("패킷이 너무 작음: {len} bytes")]
    TooSmall { len: usize },

    #[error("페이로드 잘림: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("알 수 없는 패킷 타입: {tag}")]
    UnknownType { tag: u8 },

    #[error("체크섬 불일치: expected {expected:08X}, got {got:08X}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("패킷 타입 불일치: expected {expected:?}, got {got:?}")]
    TypeMismatch {
        expected: PacketType,
        got: PacketType,
    },

    #[error("유효하지 않은 FileInfo 페이로드")]
    InvalidFileInfo,

    #[error("패킷 누락: seq={seq}")]
    MissingPacket { seq: u32 },

    #[error("파일 무결성 검증 실패")]
    IntegrityMismatch,

    #[error("전송 타임아웃")]
    Timeout,

    #[error("채널 에러")]
    ChannelError,

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
