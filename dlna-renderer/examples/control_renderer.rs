//! Drive a renderer from the command line and print its events.
//!
//! ```text
//! cargo run -p dlna-renderer --example control_renderer -- \
//!     http://192.168.1.50:49152/description.xml \
//!     http://192.168.1.20:8000/song.mp3 audio/mp3
//! ```
//!
//! The first argument is the device description location announced over
//! SSDP. With a media URL and MIME type the renderer is asked to play it.

use std::time::Duration;

use dlna_renderer::{Capability, MediaRenderer, MediaRequest, ServiceDescription};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dlna_renderer=debug,callback_server=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(location) = args.next() else {
        eprintln!("usage: control_renderer <description-url> [media-url mime-type]");
        return Ok(());
    };

    let xml = reqwest::get(&location).await?.text().await?;
    let description = ServiceDescription::from_xml(&location, &xml)?;
    println!(
        "Renderer: {} at {}",
        description.friendly_name.as_deref().unwrap_or("(unnamed)"),
        description.ip_address
    );

    let renderer = MediaRenderer::new(description)?;
    println!("Capabilities: {:?}", renderer.capabilities());

    let play_state = renderer
        .subscribe_play_state(|state| println!("  play state -> {state:?}"))
        .await?;
    let volume = renderer
        .subscribe_volume(|volume| println!("  volume -> {:.0}%", volume * 100.0))
        .await?;

    if let (Some(url), Some(mime_type)) = (args.next(), args.next()) {
        renderer
            .display_media(MediaRequest::new(url, mime_type).title("control_renderer"))
            .await?;
        println!("Duration: {:?}", renderer.get_duration().await?);
    }

    if renderer.has_capability(Capability::VolumeGet) {
        println!("Volume: {:.2}", renderer.get_volume().await?);
        println!("Muted: {}", renderer.get_mute().await?);
    }
    if renderer.has_capability(Capability::PlayState) {
        println!("State: {:?}", renderer.get_play_state().await?);
        println!("Position: {:?}", renderer.get_position().await?);
    }

    println!("Listening for events for 30 seconds...");
    tokio::time::sleep(Duration::from_secs(30)).await;

    play_state.unsubscribe().await?;
    volume.unsubscribe().await?;
    Ok(())
}
