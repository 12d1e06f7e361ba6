//! Publish a local FLV file to an RTMP server at its own pace
//!
//! Run with: cargo run --example publish_file <FILE.flv> <rtmp://host/app/stream>
//!
//! Example against a local server:
//!   cargo run --example publish_file clip.flv rtmp://localhost/live/test_key
//!
//! Watch it with:
//!   ffplay rtmp://localhost/live/test_key

use streamcast::{ClientConfig, PublishEvent, RtmpPublisher};

fn print_usage() {
    eprintln!("Usage: publish_file <FILE.flv> <rtmp://host/app/stream>");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let (Some(file), Some(url)) = (args.get(1), args.get(2)) else {
        print_usage();
        std::process::exit(1);
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("streamcast=info".parse()?),
        )
        .init();

    let (publisher, mut events) = RtmpPublisher::new(ClientConfig::new(url.clone()));
    let cancel = publisher.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Cancelling...");
            cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    let progress = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PublishEvent::Finished(_) => println!("Stream closed"),
                other => println!("Event: {:?}", other),
            }
        }
    });

    let stats = publisher.publish_file(file).await?;
    println!(
        "Published {} messages ({} video, {} audio), {} bytes in {:.1}s, last ts {} ms",
        stats.messages(),
        stats.video_messages,
        stats.audio_messages,
        stats.payload_bytes,
        stats.elapsed.as_secs_f64(),
        stats.last_timestamp,
    );
    drop(publisher);
    let _ = progress.await;
    Ok(())
}
