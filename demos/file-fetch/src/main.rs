//! Fetch a file over a multiplexed session and print it.
//!
//! Run with: cargo run -p file-fetch-demo -- <ws-url> <path>

use anyhow::Context as _;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wiremux_client::Client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().context("usage: file-fetch-demo <ws-url> <path>")?;
    let path = args.next().context("usage: file-fetch-demo <ws-url> <path>")?;

    let client = Client::builder().url(url).build();
    client.connect().await.context("connect")?;
    tracing::info!("session open");

    let content = client.read_file(&path).await.context("read file")?;
    println!("{content}");

    client.disconnect(true).await;
    Ok(())
}
