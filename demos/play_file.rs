//! Play an FLV file or RTMP stream into memory-backed outputs
//!
//! Run with: cargo run --example play_file <FILE.flv | rtmp://host/app/stream>
//!
//! AVC/AAC/MP3 sources need the FFmpeg decoders:
//!   cargo run --example play_file --features ffmpeg -- clip.flv
//!
//! Set RUST_LOG=streamcast=debug to follow the stage threads.

use std::sync::Arc;
use std::time::Duration;

use streamcast::{Engine, MediaKind, MemorySurface, PixelFormat, PlayerConfig, RingBufferDevice};

fn print_usage() {
    eprintln!("Usage: play_file <FILE.flv | rtmp://host/app/stream>");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Some(source) = std::env::args().nth(1) else {
        print_usage();
        std::process::exit(1);
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("streamcast=info".parse()?),
        )
        .init();

    let engine = Engine::new(PlayerConfig::default());
    let handle = engine.open(&source)?;
    let info = engine.info(handle)?;
    println!("Opened {} ({} streams, duration {:?} ms)", source, info.streams.len(), info.duration_ms);
    for stream in &info.streams {
        println!("  #{} {:?} {}", stream.index, stream.kind(), stream.codec.name());
    }

    let surface = MemorySurface::new(640, 360, PixelFormat::Rgba);
    if info.stream(MediaKind::Video).is_some() {
        engine.start_video(handle, Box::new(surface.clone()), 0, 0)?;
    }
    if let Some(audio) = info.stream(MediaKind::Audio) {
        let channels = u16::from(audio.channels.max(1));
        let device = RingBufferDevice::new(audio.sample_rate.max(8000), channels, Duration::from_millis(500))?;
        engine.start_audio(handle, Arc::new(device))?;
    }

    let events = engine.events(handle)?;
    std::thread::spawn(move || {
        for event in events {
            println!("Event: {:?}", event);
        }
    });

    let outcome = engine.wait(handle, None)?;
    let stats = engine.stats(handle)?;
    println!("Outcome: {:?}", outcome);
    println!(
        "Stats: read={} presented={} dropped={} audio={} underruns={} discarded={}",
        stats.packets_read,
        stats.frames_presented,
        stats.frames_dropped,
        stats.audio_frames_played,
        stats.audio_underruns,
        stats.packets_discarded,
    );
    println!("Surface received {} frames", surface.frames_submitted());

    engine.release(handle)?;
    Ok(())
}
