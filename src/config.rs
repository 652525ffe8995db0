//! 전송 설정

use std::path::PathBuf;

/// RUDP 전송 설정
///
/// 기본값이 프로토콜 기준 동작이고, 프리셋은 경로 특성에 맞춘 튜닝이다.
/// 페이싱은 제거하지 말 것 - 혼잡제어를 대체하는 유일한 백프레셔다.
#[derive(Debug, Clone)]
pub struct Config {
    /// 패킷 간 전송 지연 (마이크로초)
    pub pacing_interval_us: u64,

    /// NACK 생성 주기 (밀리초)
    pub nack_interval_ms: u64,

    /// 소켓 수신 데드라인 (밀리초)
    ///
    /// 종료 신호 확인 주기를 겸하므로 취소 지연의 상한이기도 하다
    pub recv_timeout_ms: u64,

    /// Complete 에코 대기 타임아웃 (초)
    pub complete_timeout_secs: u64,

    /// Complete 수신 후 누락 패킷 재전송 대기 유예 (밀리초)
    ///
    /// 이 시간 동안 새 데이터가 없으면 누락 상태 그대로 마무리를 시도한다
    pub pending_grace_ms: u64,

    /// 재전송 큐 용량 (시퀀스 번호 수)
    pub retransmit_queue_capacity: usize,

    /// 처리량 측정 윈도우 (패킷 수)
    pub stats_window_size: usize,

    /// 수신 파일 저장 디렉토리
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pacing_interval_us: 10,           // 10us 고정 페이싱
            nack_interval_ms: 100,            // 100ms마다 갭 스캔
            recv_timeout_ms: 100,
            complete_timeout_secs: 300,       // 5분
            pending_grace_ms: 10_000,         // 10초
            retransmit_queue_capacity: 1000,
            stats_window_size: 128,
            output_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저지연 LAN용 설정
    pub fn lan() -> Self {
        Self {
            pacing_interval_us: 1,
            nack_interval_ms: 50,
            recv_timeout_ms: 50,
            complete_timeout_secs: 60,
            pending_grace_ms: 3_000,
            retransmit_queue_capacity: 1000,
            stats_window_size: 256,
            output_dir: PathBuf::from("."),
        }
    }

    /// 고지연 장거리 경로용 설정
    pub fn long_haul() -> Self {
        Self {
            pacing_interval_us: 10,
            nack_interval_ms: 100,
            recv_timeout_ms: 100,
            complete_timeout_secs: 600,       // 10분
            pending_grace_ms: 30_000,
            retransmit_queue_capacity: 2000,
            stats_window_size: 128,
            output_dir: PathBuf::from("."),
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            pacing_interval_us: 50,           // 버스트 완화
            nack_interval_ms: 100,
            recv_timeout_ms: 100,
            complete_timeout_secs: 300,
            pending_grace_ms: 20_000,
            retransmit_queue_capacity: 4000,
            stats_window_size: 64,
            output_dir: PathBuf::from("."),
        }
    }
}
