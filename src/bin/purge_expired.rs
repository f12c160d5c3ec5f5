//! Deletes expired rows from the durable cache store.

use dotenvy::dotenv;
use rust_lead_api::db::Database;
use std::env;

/// Connects with `DATABASE_URL`, makes sure the schema exists and removes every row
/// whose `expires_at` has passed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let db = Database::new(&database_url).await?;
    db.ensure_schema().await?;

    tracing::info!("Connected to database. Purging expired cache rows...");
    let removed = db.purge_expired().await?;
    tracing::info!("Purge complete: {} expired rows removed", removed);

    Ok(())
}
