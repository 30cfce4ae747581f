use log::error;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Err(e) = cgateweb::run().await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
