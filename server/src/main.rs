use clap::Parser;
use log::{error, info};
use server::broadcast::RelayEvent;
use server::config::RelayConfig;
use server::network::RelayServer;
use shared::{Framing, DEFAULT_HOST, DEFAULT_PORT, MAX_MESSAGE_LEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Message framing: "raw" (one read per message) or "lines"
    #[arg(short, long, default_value_t = Framing::Raw)]
    framing: Framing,

    /// Evict peers that take longer than this to accept a message (0 disables)
    #[arg(long, default_value = "5000")]
    write_timeout_ms: u64,

    /// Largest accepted message in bytes
    #[arg(long, default_value_t = MAX_MESSAGE_LEN)]
    max_message_len: usize,

    /// Do not print relayed messages to stdout
    #[arg(long)]
    no_display: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let write_timeout = match args.write_timeout_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };
    let config = RelayConfig::new(bind_addr)
        .with_framing(args.framing)
        .with_write_timeout(write_timeout)
        .with_max_message_len(args.max_message_len);

    let server = match RelayServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    if !args.no_display {
        let mut events = server.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => display(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        eprintln!("({} messages not shown)", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        shutdown.shutdown();
    });

    server.run().await?;

    Ok(())
}

/// Server-side view of the room
fn display(event: &RelayEvent) {
    match event {
        RelayEvent::Joined { name, addr, .. } => println!("* {} joined from {}", name, addr),
        RelayEvent::Message { line, .. } => println!("{}", line),
        RelayEvent::Left { name, .. } => println!("* {} left", name),
    }
}
