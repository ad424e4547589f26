use clap::Parser;
use client::network::ChatClient;
use log::{error, info};
use rand::Rng;
use shared::{Framing, DEFAULT_HOST, DEFAULT_PORT};
use tokio::io::{self, AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value_t = format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT))]
    server: String,

    /// Display name; defaults to a random "Client<n>"
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Message framing: "raw" or "lines"; must match the relay
    #[arg(short, long, default_value_t = Framing::Raw)]
    framing: Framing,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let name = args
        .name
        .unwrap_or_else(|| format!("Client{}", rand::thread_rng().gen_range(1..=999)));

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let client = ChatClient::connect(&args.server, &name, args.framing).await?;
    println!("Connected as {}. Type a message and press Enter.", client.name());

    let (mut sender, mut receiver) = client.split();

    let mut inbound = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(Some(line)) => println!("{}", line),
                Ok(None) => break,
                Err(e) => {
                    error!("Error receiving message: {}", e);
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        tokio::select! {
            _ = &mut inbound => {
                println!("Disconnected from server");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) if line.is_empty() => {}
                Some(line) => {
                    if let Err(e) = sender.send(&line).await {
                        error!("Error sending message: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = sender.close().await;
                    break;
                }
            },
        }
    }

    Ok(())
}
