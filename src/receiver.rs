//! 수신 엔진
//!
//! - 순서 무관 패킷 수신, 시퀀스 번호 키 버퍼에 적재
//! - 주기적 갭 스캔으로 NACK 생성
//! - Complete 수신 후 순서대로 재조립, SHA-256 검증, Complete 에코

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::integrity;
use crate::packet::{Packet, PacketType};
use crate::stats::TransferStats;
use crate::{Config, Error, Result, MAX_DATA_SIZE, MAX_NACK_SEQS};

/// 수신 세션 (FileInfo 도착부터 마무리까지)
struct Session {
    file_name: String,
    file_size: u64,
    file_hash: [u8; 32],
    output_path: PathBuf,
    output_file: File,
}

/// 수신자
pub struct Receiver {
    /// 설정
    config: Config,

    /// 바인드된 UDP 소켓 (수신 루프와 NACK 생성기가 공유)
    socket: Arc<UdpSocket>,

    /// 수신 패킷 버퍼: seq_num → 페이로드
    ///
    /// 수신 루프가 O(1) 삽입, NACK 생성기가 O(max_seq) 스캔.
    /// 샤드 락이라 스캔이 수신 경로를 전역으로 막지 않는다.
    received: Arc<DashMap<u32, Bytes>>,

    /// 마지막으로 패킷을 보낸 피어 주소 (last-writer-wins)
    client_addr: Arc<RwLock<Option<SocketAddr>>>,

    /// 아직 채워지지 않았을 수 있는 최소 시퀀스 (연속 수신 구간 스킵용)
    expected_seq: Arc<AtomicU32>,

    /// FileInfo에서 유도한 최대 시퀀스 번호
    max_seq: Arc<AtomicU32>,

    /// 수신 통계
    stats: Arc<RwLock<TransferStats>>,

    /// 실행 중 플래그
    running: Arc<AtomicBool>,
}

impl Receiver {
    /// 주소에 바인드된 새 수신자 생성
    pub async fn bind(addr: impl ToSocketAddrs, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let stats = TransferStats::new(config.stats_window_size);

        Ok(Self {
            config,
            socket: Arc::new(socket),
            received: Arc::new(DashMap::new()),
            client_addr: Arc::new(RwLock::new(None)),
            expected_seq: Arc::new(AtomicU32::new(0)),
            max_seq: Arc::new(AtomicU32::new(0)),
            stats: Arc::new(RwLock::new(stats)),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// 바인드된 로컬 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 전송 1회 수신
    ///
    /// Complete 수신 + 무결성 검증 성공이면 통계를 반환한다. close()가
    /// 불리면 ConnectionClosed, 마무리 시점에 패킷이 비어 있으면
    /// MissingPacket, 해시 불일치면 IntegrityMismatch.
    pub async fn listen(&self) -> Result<TransferStats> {
        info!("Receiver listening on {}", self.socket.local_addr()?);

        let mut nack_task = Some(tokio::spawn(nack_generator(
            self.socket.clone(),
            self.received.clone(),
            self.client_addr.clone(),
            self.expected_seq.clone(),
            self.max_seq.clone(),
            self.stats.clone(),
            self.running.clone(),
            Duration::from_millis(self.config.nack_interval_ms),
        )));

        let recv_timeout = Duration::from_millis(self.config.recv_timeout_ms);
        let pending_grace = Duration::from_millis(self.config.pending_grace_ms);

        let mut session: Option<Session> = None;
        let mut complete_pending = false;
        let mut bytes_received: u64 = 0;
        let mut last_data = Instant::now();
        let mut last_progress = Instant::now();
        let mut buf = vec![0u8; 2048];

        loop {
            let recv_result =
                tokio::time::timeout(recv_timeout, self.socket.recv_from(&mut buf)).await;

            let (n, addr) = match recv_result {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    self.stop_companions(&mut nack_task).await;
                    return Err(e.into());
                }
                Err(_) => {
                    // 수신 타임아웃: 종료/유예 데드라인 확인 기회
                    if !self.running.load(Ordering::SeqCst) {
                        self.stop_companions(&mut nack_task).await;
                        return Err(Error::ConnectionClosed);
                    }
                    if complete_pending && last_data.elapsed() >= pending_grace {
                        // 재전송이 끊겼다 - 누락 상태 그대로 마무리를 시도해
                        // MissingPacket을 드러낸다
                        if let Some(sess) = session.take() {
                            warn!("재전송 유예 만료, 누락 상태로 마무리");
                            return self.finish(sess, &mut nack_task).await;
                        }
                    }
                    continue;
                }
            };

            let packet = match Packet::deserialize(&buf[..n]) {
                Ok(packet) => packet,
                Err(_) => {
                    self.stats.write().dropped_packets += 1;
                    continue;
                }
            };
            if !packet.verify() {
                self.stats.write().dropped_packets += 1;
                continue;
            }

            *self.client_addr.write() = Some(addr);

            match packet.packet_type {
                PacketType::FileInfo => {
                    if session.is_some() {
                        debug!("FileInfo 재수신, 무시");
                        continue;
                    }

                    let (file_name, file_size, file_hash) = match packet.extract_file_info() {
                        Ok(info) => info,
                        Err(_) => {
                            self.stats.write().dropped_packets += 1;
                            continue;
                        }
                    };
                    let file_size = match u64::try_from(file_size) {
                        Ok(size) => size,
                        Err(_) => {
                            self.stats.write().dropped_packets += 1;
                            continue;
                        }
                    };

                    let max_seq =
                        ((file_size + MAX_DATA_SIZE as u64 - 1) / MAX_DATA_SIZE as u64) as u32;
                    let output_path = self.config.output_dir.join(&file_name);
                    let output_file = match File::create(&output_path).await {
                        Ok(file) => file,
                        Err(e) => {
                            self.stop_companions(&mut nack_task).await;
                            return Err(e.into());
                        }
                    };

                    self.max_seq.store(max_seq, Ordering::Release);
                    self.expected_seq.store(1, Ordering::Release);
                    *self.stats.write() = TransferStats::new(self.config.stats_window_size);

                    info!(
                        "Receiving file: {} ({} bytes, {} packets)",
                        file_name, file_size, max_seq
                    );

                    session = Some(Session {
                        file_name,
                        file_size,
                        file_hash,
                        output_path,
                        output_file,
                    });
                }

                PacketType::Data => {
                    // FileInfo 이전의 데이터는 max_seq를 모르므로 폐기
                    if session.is_none() {
                        self.stats.write().dropped_packets += 1;
                        continue;
                    }

                    let max_seq = self.max_seq.load(Ordering::Acquire);
                    let seq_num = packet.seq_num;
                    if seq_num == 0 || seq_num > max_seq {
                        self.stats.write().dropped_packets += 1;
                        continue;
                    }

                    last_data = Instant::now();

                    // 같은 키 덮어쓰기는 동일 페이로드라 멱등
                    match self.received.insert(seq_num, packet.data) {
                        Some(_) => {
                            self.stats.write().duplicate_packets += 1;
                        }
                        None => {
                            bytes_received += packet.data_size as u64;
                            let mut stats = self.stats.write();
                            stats.record_bytes(packet.data_size as usize);
                            stats.total_packets += 1;
                        }
                    }

                    let file_size = session.as_ref().map(|s| s.file_size).unwrap_or(0);
                    if last_progress.elapsed() > Duration::from_millis(500) && file_size > 0 {
                        let progress = (bytes_received as f64 / file_size as f64) * 100.0;
                        info!(
                            "수신 진행: {:.1}% | {}/{} bytes | {:.2} MB/s",
                            progress.min(100.0),
                            bytes_received,
                            file_size,
                            self.stats.read().instant_throughput() / 1_000_000.0
                        );
                        last_progress = Instant::now();
                    }

                    // Complete가 먼저 와 있었다면 마지막 갭이 채워지는
                    // 시점에 마무리한다
                    if complete_pending && self.coverage_full() {
                        if let Some(sess) = session.take() {
                            return self.finish(sess, &mut nack_task).await;
                        }
                    }
                }

                PacketType::Complete => {
                    if session.is_none() {
                        self.stats.write().dropped_packets += 1;
                        continue;
                    }

                    if self.coverage_full() {
                        if let Some(sess) = session.take() {
                            return self.finish(sess, &mut nack_task).await;
                        }
                    } else if !complete_pending {
                        // 재정렬로 Complete가 데이터를 앞질렀다 - 바로
                        // 실패하는 대신 NACK 재전송으로 갭을 마저 채운다
                        complete_pending = true;
                        last_data = Instant::now();
                        let missing = self.max_seq.load(Ordering::Acquire) as u64
                            - self.received.len() as u64;
                        info!("Complete 선착, 누락 {}개 재전송 대기", missing);
                    }
                }

                // 수신측에서 NACK/ACK는 의미 없음
                PacketType::Nack | PacketType::Ack => {}
            }
        }
    }

    /// 1..=max_seq 전 구간이 버퍼에 있는지 확인
    ///
    /// 범위 밖 시퀀스는 삽입 전에 걸러지므로 개수 비교로 충분하다
    fn coverage_full(&self) -> bool {
        self.received.len() as u32 >= self.max_seq.load(Ordering::Acquire)
    }

    async fn stop_companions(&self, nack_task: &mut Option<JoinHandle<()>>) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = nack_task.take() {
            let _ = handle.await;
        }
    }

    async fn finish(
        &self,
        session: Session,
        nack_task: &mut Option<JoinHandle<()>>,
    ) -> Result<TransferStats> {
        self.stop_companions(nack_task).await;
        self.finalize(session).await
    }

    /// 재조립 + 무결성 검증 + Complete 에코
    async fn finalize(&self, session: Session) -> Result<TransferStats> {
        info!("재조립 시작: {}", session.file_name);

        let mut output = session.output_file;
        let max_seq = self.max_seq.load(Ordering::Acquire);

        for seq in 1..=max_seq {
            let (_, data) = self
                .received
                .remove(&seq)
                .ok_or(Error::MissingPacket { seq })?;
            output.write_all(&data).await?;
        }
        output.flush().await?;
        drop(output);

        let actual_hash = integrity::hash_file(&session.output_path).await?;
        if !integrity::hashes_match(&session.file_hash, &actual_hash) {
            // 출력 파일은 진단을 위해 디스크에 남긴다
            return Err(Error::IntegrityMismatch);
        }

        let client_addr = match *self.client_addr.read() {
            Some(addr) => addr,
            None => return Err(Error::ConnectionClosed),
        };
        self.socket
            .send_to(&Packet::new_complete().serialize(), client_addr)
            .await?;

        let stats = self.stats.read().clone();
        info!("파일 수신 완료: {}", session.file_name);
        info!("{}", stats.summary());
        Ok(stats)
    }

    /// 통계 반환
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    /// 수신 중단 (멱등)
    ///
    /// 대기 중인 수신은 다음 데드라인에서 풀리고 listen은
    /// ConnectionClosed로 돌아온다
    pub fn close(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("수신자 종료 요청");
        }
    }
}

/// NACK 생성기
///
/// 주기마다 expected_seq..=max_seq를 스캔해 누락 시퀀스를 최대 50개까지
/// 모아 피어에 보낸다. 연속 수신 구간은 expected_seq를 전진시켜 다음
/// 스캔에서 건너뛴다.
#[allow(clippy::too_many_arguments)]
async fn nack_generator(
    socket: Arc<UdpSocket>,
    received: Arc<DashMap<u32, Bytes>>,
    client_addr: Arc<RwLock<Option<SocketAddr>>>,
    expected_seq: Arc<AtomicU32>,
    max_seq: Arc<AtomicU32>,
    stats: Arc<RwLock<TransferStats>>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(interval).await;

        let max = max_seq.load(Ordering::Acquire);
        if max == 0 {
            continue; // FileInfo 이전이거나 빈 파일
        }

        // 연속 수신 구간 스킵
        let mut expected = expected_seq.load(Ordering::Acquire);
        while expected <= max && received.contains_key(&expected) {
            expected += 1;
        }
        expected_seq.store(expected, Ordering::Release);
        if expected > max {
            continue; // 갭 없음
        }

        let mut missing = Vec::new();
        for seq in expected..=max {
            if !received.contains_key(&seq) {
                missing.push(seq);
                if missing.len() >= MAX_NACK_SEQS {
                    break;
                }
            }
        }
        if missing.is_empty() {
            continue;
        }

        let addr = match *client_addr.read() {
            Some(addr) => addr,
            None => continue,
        };

        let nack = Packet::new_nack(&missing);
        if let Err(e) = socket.send_to(&nack.serialize(), addr).await {
            warn!("NACK 전송 실패: {}", e);
            continue;
        }

        stats.write().nacks_sent += 1;
        debug!("NACK 전송: {}개 누락, 첫 seq={}", missing.len(), missing[0]);
    }
}
