//! Send a single audio file to one device

use std::path::PathBuf;

use autotq::{Device, TransferSpeed, send_file};

#[tokio::main]
async fn main() -> autotq::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let port = std::env::var("AUTOTQ_PORT").unwrap_or_else(|_| "/dev/ttyACM0".to_string());
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("audio/inflating.wav"));

    let mut device = Device::new(port);
    device.connect().await?;

    let profile = TransferSpeed::Normal.profile();
    let result = send_file(&mut device, &path, &profile).await;

    // Release the port before reporting
    device.close().await;

    let done = result?;
    println!(
        "✓ {} ({} bytes, CRC32 0x{:08X})",
        done.filename, done.bytes, done.crc32
    );

    Ok(())
}
