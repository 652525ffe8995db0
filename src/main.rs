//! flash CLI - RUDP 파일 전송 도구
//!
//! 사용법:
//!   flash receive [--port 8080]
//!   flash send <file> <host:port>

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use flash::{Config, Receiver, Result, Sender, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "flash", about = "NACK 재전송 기반 RUDP 고속 파일 전송")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 수신 서버 시작 (받은 파일은 현재 디렉토리에 저장)
    Receive {
        /// 수신 포트
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// 파일 전송 (서버 주소는 host:port 형식)
    Send {
        /// 전송할 파일 경로
        file: PathBuf,

        /// 수신 서버 주소 (예: 192.168.1.100:8080)
        server: String,
    },
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Receive { port } => {
            let receiver = Receiver::bind(("0.0.0.0", port), Config::default()).await?;
            let stats = receiver.listen().await?;
            println!("{}", stats.summary());
        }
        Command::Send { file, server } => {
            let sender = Sender::connect(server.as_str(), Config::default()).await?;
            let stats = sender.send_file(&file).await?;
            println!("{}", stats.summary());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();

    if let Command::Send { file, .. } = &cli.command {
        if !file.exists() {
            eprintln!("파일이 존재하지 않습니다: {}", file.display());
            return ExitCode::FAILURE;
        }
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("에러: {}", e);
            ExitCode::FAILURE
        }
    }
}
