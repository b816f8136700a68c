use clap::Parser;
use log::info;
use server::config::MatchConfig;
use server::network::Server;
use shared::{ABORT_SECONDS, START_CLOCK_SECONDS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Match loop ticks per second
    #[arg(short, long, default_value = "10")]
    tick_rate: u32,

    /// Time budget per player in seconds
    #[arg(short, long, default_value_t = START_CLOCK_SECONDS)]
    clock_seconds: f64,

    /// Seconds White has to make the first move
    #[arg(short, long, default_value_t = ABORT_SECONDS)]
    abort_seconds: f64,

    /// Seconds to keep connections open after the match ends
    #[arg(short, long, default_value = "60")]
    grace_seconds: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);
    let config = MatchConfig::from_seconds(
        args.tick_rate,
        args.clock_seconds,
        args.abort_seconds,
        args.grace_seconds,
    );

    info!("Starting chess server on {}", address);
    info!(
        "Tick rate: {} Hz, clock: {}s, first move deadline: {}s",
        args.tick_rate, args.clock_seconds, args.abort_seconds
    );

    let mut server = Server::new(&address, config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
