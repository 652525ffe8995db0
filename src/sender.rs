//! 송신 엔진
//!
//! - 순차 청크 전송 + 고정 페이싱
//! - NACK 리스너와 재전송 태스크가 같은 소켓을 공유
//! - 수신측 Complete 에코까지 대기 후 종료

use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::integrity;
use crate::packet::{Packet, PacketType};
use crate::stats::TransferStats;
use crate::{Config, Error, Result, MAX_DATA_SIZE};

/// 송신자
///
/// 상태 전이: Idle → Announcing → Transmitting → AwaitingComplete →
/// {Completed | TimedOut}. 동반 태스크(NACK 리스너, 재전송기)는
/// Transmitting과 AwaitingComplete 동안 살아 있고 종료 시 join된다.
pub struct Sender {
    /// 설정
    config: Config,

    /// 피어에 connect된 UDP 소켓 (태스크 간 공유)
    socket: Arc<UdpSocket>,

    /// 전송 통계
    stats: Arc<RwLock<TransferStats>>,

    /// 실행 중 플래그 (동반 태스크 종료 신호)
    running: Arc<AtomicBool>,
}

impl Sender {
    /// 피어 주소로 연결된 새 송신자 생성
    pub async fn connect(server_addr: impl ToSocketAddrs, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server_addr).await?;

        let stats = TransferStats::new(config.stats_window_size);

        Ok(Self {
            config,
            socket: Arc::new(socket),
            stats: Arc::new(RwLock::new(stats)),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 파일 전송
    ///
    /// 수신측이 무결성 검증을 마치고 Complete를 에코해야 성공으로 반환한다.
    /// 에코가 complete_timeout 내에 오지 않으면 Timeout 에러.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<TransferStats> {
        let path = path.as_ref();

        let mut file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        // 전송 전에 전체 해시 계산 후 되감기
        let file_hash = integrity::hash_reader(&mut file).await?;
        file.seek(SeekFrom::Start(0)).await?;

        let total_packets = ((file_size + MAX_DATA_SIZE as u64 - 1) / MAX_DATA_SIZE as u64) as u32;
        *self.stats.write() = TransferStats::new(self.config.stats_window_size);

        info!(
            "Sending file: {} ({} bytes, {} packets)",
            file_name, file_size, total_packets
        );

        // 세션 개시 선언, ACK는 기다리지 않는다
        let info_packet = Packet::new_file_info(&file_name, file_size as i64, file_hash);
        self.socket.send(&info_packet.serialize()).await?;

        self.running.store(true, Ordering::SeqCst);

        // 재전송 큐: NACK 리스너(생산자) → 재전송기(소비자)
        let (retransmit_tx, retransmit_rx) =
            mpsc::channel::<u32>(self.config.retransmit_queue_capacity);
        let (complete_tx, complete_rx) = oneshot::channel::<()>();

        let listener = tokio::spawn(nack_listener(
            self.socket.clone(),
            self.running.clone(),
            self.stats.clone(),
            retransmit_tx,
            complete_tx,
            Duration::from_millis(self.config.recv_timeout_ms),
        ));

        // 재전송기는 별도 읽기 전용 핸들을 소유해 주 전송 경로와
        // seek 경합이 없다
        let retransmit_file = File::open(path).await?;
        let retransmitter = tokio::spawn(retransmitter(
            self.socket.clone(),
            self.stats.clone(),
            retransmit_file,
            retransmit_rx,
        ));

        // 주 전송이 실패해도 동반 태스크는 반드시 join하고 에러를 전파한다
        let outcome = match self.transmit(&mut file, file_size).await {
            Ok(()) => match self.socket.send(&Packet::new_complete().serialize()).await {
                Ok(_) => {
                    debug!("Complete 전송, 에코 대기");
                    Ok(tokio::time::timeout(
                        Duration::from_secs(self.config.complete_timeout_secs),
                        complete_rx,
                    )
                    .await)
                }
                Err(e) => Err(Error::from(e)),
            },
            Err(e) => Err(e),
        };

        self.running.store(false, Ordering::SeqCst);
        let listener_result = listener.await.map_err(|_| Error::ChannelError)?;
        let retransmitter_result = retransmitter.await.map_err(|_| Error::ChannelError)?;

        match outcome? {
            Ok(Ok(())) => {
                listener_result?;
                retransmitter_result?;
            }
            Ok(Err(_)) => {
                // 리스너가 완료 신호 없이 죽었다면 원인 에러를 우선 전파
                listener_result?;
                retransmitter_result?;
                return Err(Error::ChannelError);
            }
            Err(_) => {
                listener_result?;
                retransmitter_result?;
                return Err(Error::Timeout);
            }
        }

        let stats = self.stats.read().clone();
        info!("파일 전송 완료: {}", file_name);
        info!("{}", stats.summary());
        Ok(stats)
    }

    /// 주 전송 루프: 순차 읽기 → Data 패킷 → 페이싱 지연
    async fn transmit(&self, file: &mut File, file_size: u64) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATA_SIZE];
        let mut seq_num: u32 = 1;
        let mut bytes_sent: u64 = 0;
        let mut last_progress = Instant::now();

        loop {
            let n = read_chunk(file, &mut buf).await?;
            if n == 0 {
                break;
            }

            let packet = Packet::new_data(seq_num, &buf[..n]);
            self.socket.send(&packet.serialize()).await?;
            bytes_sent += n as u64;

            {
                let mut stats = self.stats.write();
                stats.record_bytes(n);
                stats.total_packets += 1;
            }

            if last_progress.elapsed() > Duration::from_millis(500) && file_size > 0 {
                let progress = (bytes_sent as f64 / file_size as f64) * 100.0;
                info!(
                    "전송 진행: {:.1}% | seq {} | {:.2} MB/s",
                    progress,
                    seq_num,
                    self.stats.read().instant_throughput() / 1_000_000.0
                );
                last_progress = Instant::now();
            }

            seq_num += 1;

            if self.config.pacing_interval_us > 0 {
                tokio::time::sleep(Duration::from_micros(self.config.pacing_interval_us)).await;
            }
        }

        Ok(())
    }

    /// 통계 반환
    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    /// 전송 중단 (멱등)
    pub fn close(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("송신자 종료 요청");
        }
    }
}

/// 버퍼가 차거나 EOF까지 반복해서 읽는다
///
/// 짧은 read가 섞여도 시퀀스 번호 ↔ 파일 오프셋 대응이 유지되어야 한다
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// NACK 리스너
///
/// 100ms 데드라인으로 수신하며 유효한 NACK의 시퀀스 번호를 재전송 큐에
/// 넣는다. Complete 에코는 완료 신호로 바꾼다. 파싱/검증 실패는 조용히
/// 폐기하지만 소켓 에러는 삼키지 않고 send_file까지 올린다.
async fn nack_listener(
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<TransferStats>>,
    retransmit_tx: mpsc::Sender<u32>,
    complete_tx: oneshot::Sender<()>,
    recv_timeout: Duration,
) -> Result<()> {
    let mut buf = vec![0u8; 2048];
    let mut complete_tx = Some(complete_tx);

    while running.load(Ordering::SeqCst) {
        let n = match tokio::time::timeout(recv_timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                if !running.load(Ordering::SeqCst) {
                    return Ok(());
                }
                warn!("NACK 리스너 수신 에러: {}", e);
                return Err(e.into());
            }
            Err(_) => continue,
        };

        let packet = match Packet::deserialize(&buf[..n]) {
            Ok(packet) => packet,
            Err(_) => {
                stats.write().dropped_packets += 1;
                continue;
            }
        };
        if !packet.verify() {
            stats.write().dropped_packets += 1;
            continue;
        }

        match packet.packet_type {
            PacketType::Nack => {
                let seqs = packet.extract_nack_seqs()?;
                debug!("NACK 수신: {}개 누락", seqs.len());
                stats.write().nacks_received += 1;

                for seq in seqs {
                    if retransmit_tx.send(seq).await.is_err() {
                        // 재전송기 종료, 리스너도 따라 내려간다
                        return Ok(());
                    }
                }
            }
            PacketType::Complete => {
                if let Some(tx) = complete_tx.take() {
                    let _ = tx.send(());
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// 재전송기
///
/// 큐의 시퀀스 번호마다 (seq-1) × MAX_DATA_SIZE로 seek해서 같은 번호의
/// Data 패킷을 다시 만든다. 같은 번호가 여러 번 와도 그대로 재전송한다 -
/// 수신측 삽입이 멱등이라 무해하다.
async fn retransmitter(
    socket: Arc<UdpSocket>,
    stats: Arc<RwLock<TransferStats>>,
    mut file: File,
    mut queue: mpsc::Receiver<u32>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATA_SIZE];

    while let Some(seq_num) = queue.recv().await {
        if seq_num == 0 {
            continue; // Data 시퀀스는 1부터
        }

        let offset = (seq_num as u64 - 1) * MAX_DATA_SIZE as u64;
        file.seek(SeekFrom::Start(offset)).await?;

        let n = read_chunk(&mut file, &mut buf).await?;
        if n == 0 {
            debug!("EOF 너머 재전송 요청 무시: seq={}", seq_num);
            continue;
        }

        let packet = Packet::new_data(seq_num, &buf[..n]);
        socket.send(&packet.serialize()).await?;

        let mut stats = stats.write();
        stats.retransmitted_packets += 1;
        stats.total_packets += 1;
    }

    Ok(())
}
