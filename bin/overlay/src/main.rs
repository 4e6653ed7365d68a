//! Overlay node binary.

mod cli;
mod node;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    cli::run().await
}
