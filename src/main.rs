//! azurite-core: local blob storage emulator.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use azurite_core::{Args, BlobServer, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let default_level = if args.debug {
        "debug"
    } else if args.silent {
        "error"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()?;

    let config = Config::from(args);
    let server = BlobServer::open(config).await?;

    println!(
        r#"
Blob service is starting at {}

Default account: devstoreaccount1
Blob endpoint: {}/devstoreaccount1

Press Ctrl+C to stop the server.
"#,
        server.bind_address(),
        server.base_url()
    );

    server.run().await
}
