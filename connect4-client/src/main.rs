//! 四子棋终端客户端
//!
//! 从标准输入读取命令，把引擎的状态变化打印到标准输出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connect4_client::{ClientConfig, FileSessionStore, SessionEngine, SessionEvent};
use protocol::{WsConnector, BOARD_COLUMNS};

/// Headless Connect Four client
#[derive(Parser, Debug)]
#[command(name = "connect4")]
#[command(about = "Play Connect Four against a remote match server", long_about = None)]
#[command(version)]
struct Cli {
    /// Match server WebSocket URL
    #[arg(long)]
    server: Option<String>,

    /// Username used when requesting a new match
    #[arg(short, long)]
    username: Option<String>,

    /// Rejoin the saved match instead of starting a new one
    #[arg(long)]
    rejoin: bool,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

const HELP: &str = "Commands: <column 0-6> | new [username] | rejoin | board | quit";

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志（输出到 stderr，stdout 留给棋盘）
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("connect4_client=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::load_or_default(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    info!("Match server: {}", config.server_url);

    let store = match &config.store_path {
        Some(dir) => FileSessionStore::new(dir)?,
        None => FileSessionStore::open_default()?,
    };
    info!("Session state file: {:?}", store.path());

    let engine = SessionEngine::start(config, WsConnector, Arc::new(store));
    engine.on_state_change(print_event);

    let mut username = cli.username;
    if cli.rejoin {
        report(engine.request_reconnect().await);
    } else if let Some(name) = &username {
        report(engine.request_new_match(name).await);
    } else if let Some(saved) = engine.persisted_session() {
        println!(
            "Saved match found in room {} as {}. Type `rejoin` to continue it.",
            saved.room_id, saved.username
        );
    }
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };

        match command {
            "quit" | "exit" => break,
            "new" => {
                if let Some(name) = words.next() {
                    username = Some(name.to_string());
                }
                match &username {
                    Some(name) => report(engine.request_new_match(name).await),
                    None => println!("Usage: new <username>"),
                }
            }
            "rejoin" => report(engine.request_reconnect().await),
            "board" => println!("{}", engine.view().board),
            other => match other.parse::<usize>() {
                Ok(column) if column < BOARD_COLUMNS => {
                    // 只允许落在该列最低的空格
                    match engine.view().board.drop_row(column) {
                        Some(row) => report(engine.place_disc(column, row).await),
                        None => println!("Column {} is full", column),
                    }
                }
                _ => println!("{}", HELP),
            },
        }
    }

    engine.disconnect().await;
    Ok(())
}

fn report(result: connect4_client::Result<()>) {
    if let Err(e) = result {
        println!("Error: {}", e);
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::GridChanged(board) => println!("\n{}\n", board),
        SessionEvent::TurnChanged(true) => println!("Your turn."),
        SessionEvent::TurnChanged(false) => println!("Waiting for the opponent..."),
        SessionEvent::StatusChanged(status) if !status.is_empty() => println!("> {}", status),
        SessionEvent::CountdownChanged(Some(seconds)) => {
            println!("Opponent has {}s to return", seconds)
        }
        SessionEvent::CellPainted { column, row, color } => {
            println!("Dropped {:?} disc at column {}, row {}", color, column, row)
        }
        SessionEvent::MatchStartedChanged(true) => println!("Match started!"),
        SessionEvent::Outcome(outcome) => println!("*** {} ***", outcome.message),
        SessionEvent::ServerError(error) => println!("Error: {}", error),
        other => tracing::debug!("{:?}", other),
    }
}
