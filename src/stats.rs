//! 전송 통계

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 최근 패킷 도착 기반 순간 처리량 측정 윈도우
#[derive(Debug, Clone)]
pub struct RateWindow {
    samples: VecDeque<(Instant, usize)>,
    window_size: usize,
}

impl RateWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// 패킷 도착 기록
    pub fn record(&mut self, size: usize) {
        if self.samples.len() >= self.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back((Instant::now(), size));
    }

    /// 윈도우 내 처리량 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }

        let (first, _) = self.samples.front().copied().unwrap_or((Instant::now(), 0));
        let (last, _) = self.samples.back().copied().unwrap_or((Instant::now(), 0));
        let duration = last.duration_since(first);

        if duration.is_zero() {
            return 0.0;
        }

        let total: usize = self.samples.iter().map(|(_, size)| size).sum();
        total as f64 / duration.as_secs_f64()
    }
}

/// 전체 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 총 전송/수신 페이로드 바이트 (재전송/중복 제외)
    pub total_bytes: u64,

    /// 총 데이터 패킷 수
    pub total_packets: u64,

    /// 재전송한 패킷 수 (송신측)
    pub retransmitted_packets: u64,

    /// 중복 수신 패킷 수 (수신측)
    pub duplicate_packets: u64,

    /// 폐기한 패킷 수 (파싱/검증 실패, 범위 밖 시퀀스)
    pub dropped_packets: u64,

    /// 전송한 NACK 수 (수신측)
    pub nacks_sent: u64,

    /// 수신한 NACK 수 (송신측)
    pub nacks_received: u64,

    /// 순간 처리량 윈도우
    rate: RateWindow,
}

impl TransferStats {
    pub fn new(window_size: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes: 0,
            total_packets: 0,
            retransmitted_packets: 0,
            duplicate_packets: 0,
            dropped_packets: 0,
            nacks_sent: 0,
            nacks_received: 0,
            rate: RateWindow::new(window_size),
        }
    }

    /// 페이로드 바이트 기록 (총량 + 순간 처리량 윈도우 동시 갱신)
    pub fn record_bytes(&mut self, size: usize) {
        self.total_bytes += size as u64;
        self.rate.record(size);
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 평균 처리량 (bytes/sec)
    pub fn overall_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    /// 순간 처리량 (bytes/sec, 최근 윈도우 기준)
    pub fn instant_throughput(&self) -> f64 {
        self.rate.throughput()
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {} | Packets: {} | Retransmitted: {} | Duplicates: {} | Dropped: {} | NACKs sent/recv: {}/{} | Throughput: {:.2} MB/s",
            self.elapsed().as_secs_f64(),
            self.total_bytes,
            self.total_packets,
            self.retransmitted_packets,
            self.duplicate_packets,
            self.dropped_packets,
            self.nacks_sent,
            self.nacks_received,
            self.overall_throughput() / 1_000_000.0,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new(128)
    }
}
