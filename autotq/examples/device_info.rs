//! Identify one device and list its stored files

use autotq::Device;

#[tokio::main]
async fn main() -> autotq::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Change to your device's port
    let port = std::env::var("AUTOTQ_PORT").unwrap_or_else(|_| "/dev/ttyACM0".to_string());

    println!("Connecting to {}...", port);

    let mut device = Device::new(port);
    device.connect().await?;
    println!("✓ Connected!");

    let info = device.device_info().await?;
    println!("✓ Device: {}", info);

    let files = device.list_files().await?;
    println!("✓ {} file(s) stored:", files.len());
    for file in &files {
        println!("   {}", file);
    }

    let missing = device.list_missing_audio().await?;
    if !missing.is_empty() {
        println!("✗ Missing audio: {}", missing.join(", "));
    }

    device.close().await;
    println!("✓ Disconnected");

    Ok(())
}
