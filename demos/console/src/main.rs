use std::time::Duration;

use anyhow::Context;
use chat_sync::{HttpTransport, Message, SocketConfig, SocketLogger, SyncClient, SyncConfig, unix_now};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "chat-console")]
#[command(about = "Follow a polling chat server from the terminal")]
struct Cli {
    /// Chat server base URL
    #[arg(long, default_value = "http://127.0.0.1:9898")]
    base_url: String,

    /// Name shown next to your messages (blank = anonymous)
    #[arg(short, long, default_value = "")]
    author: String,

    /// Delay between polls, in milliseconds
    #[arg(long, default_value = "0")]
    poll_interval_ms: u64,

    /// Also open a WebSocket and log its events
    #[arg(long)]
    ws: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = SyncConfig::default()
        .with_base_url(&cli.base_url)
        .with_poll_interval(Duration::from_millis(cli.poll_interval_ms));
    let transport = HttpTransport::new(&config).context("invalid chat server URL")?;

    let client = SyncClient::new(&config, transport, |m: &Message| {
        println!("{}", m.display_line(unix_now()));
    });
    let (handle, task) = client.spawn();

    let sockets = SocketLogger::new();
    if let Some(url) = cli.ws {
        let mut conn = sockets.connect(SocketConfig::new(url).with_greeting("1234567890"));
        // Events are already logged; just keep the channel drained
        tokio::spawn(async move { while conn.events.recv().await.is_some() {} });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = handle.send(line, cli.author.as_str()).await {
                        eprintln!("send failed: {}", e);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown();
    let session = task.await.context("sync loop panicked")?;
    eprintln!("stopped at message {}", session.watermark());
    Ok(())
}
