use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use inkstream_client::{ClientError, ConsumerState, HttpTransport, StreamConsumer};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "inkstream")]
#[command(version, about = "Inkstream - streaming chat client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the server, one line per turn
    Chat(ChatArgs),
}

#[derive(Args)]
struct ChatArgs {
    /// Server base URL
    #[arg(
        long,
        env = "INKSTREAM_SERVER_URL",
        default_value = "http://localhost:3000"
    )]
    server: Url,

    /// Seconds to wait for the stream to open
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Image URL attached to the first message (repeatable)
    #[arg(long = "image")]
    images: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Chat(args) => chat(args).await,
    }
}

async fn chat(args: ChatArgs) -> Result<()> {
    let mut consumer = StreamConsumer::new(HttpTransport::new(), args.server.clone())
        .with_timeout(Duration::from_secs(args.timeout_secs));
    let mut images = args.images;

    println!(
        "{} {}",
        "Connected to".dimmed(),
        args.server.as_str().cyan()
    );
    println!("{}", "Type a message and press Enter. Ctrl-D to quit.".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".green().bold());
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };

        match consumer.submit(&line, images.clone()) {
            Ok(()) => images.clear(),
            Err(ClientError::EmptyMessage) => continue,
            Err(err) => return Err(err.into()),
        }

        let state = consumer
            .run(|delta| {
                print!("{delta}");
                std::io::stdout().flush().ok();
            })
            .await;

        println!();
        if state == ConsumerState::Errored
            && let Some(last) = consumer.history().last()
        {
            println!("{}", last.text().red());
        }
    }

    Ok(())
}
