use anyhow::Result;
use clap::Parser;
use docdrop::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets such as DOCDROP_REMOTE_PASSWORD may come from a .env file.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::info!("docdrop exited cleanly"),
        Err(e) => tracing::error!(error = %e, "docdrop exited with error"),
    }
    result
}
