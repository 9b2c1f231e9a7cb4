use anyhow::Result;

use photo_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _telemetry = telemetry::init("photo-daemon")?;
    photo_daemon::server::run().await
}
