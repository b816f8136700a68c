use clap::Parser;
use client::mirror::MirrorConfig;
use client::network::Client;
use log::info;
use shared::ABORT_SECONDS;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Milliseconds to wait for the server to confirm a move
    #[arg(short = 'c', long, default_value = "1000")]
    confirm_timeout_ms: u64,

    /// Seconds White has to make the first move, as configured on the server
    #[arg(short, long, default_value_t = ABORT_SECONDS)]
    abort_seconds: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    println!("{}", client::input::HELP);

    let config = MirrorConfig::from_cli(args.confirm_timeout_ms, args.abort_seconds);
    let mut client = Client::new(&args.server, config).await?;

    client.run().await?;

    Ok(())
}
