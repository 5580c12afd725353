use std::error::Error;

use api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load environment variables from .env when present; production
    // deployments inject them directly.
    dotenvy::dotenv().ok();

    api::start().await?;

    Ok(())
}
