//! File log example: publish through a `file://` URL, then replay the log.
//!
//! Usage:
//!   cargo run --example file_log
//!   cargo run --example file_log -- /tmp/bps-demo

use anyhow::Result;
use bps::{handler_fn, CancellationToken, Flow, Message, SubOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let scratch = tempfile::tempdir()?;
    let root = match std::env::args().nth(1) {
        Some(dir) => std::path::PathBuf::from(dir),
        None => scratch.path().to_path_buf(),
    };
    let url = format!("file://{}", root.display());
    let cancel = CancellationToken::new();

    let publisher = bps::new_publisher(&cancel, &url).await?;
    let topic = publisher.topic("events");
    for i in 1..=3 {
        let msg = Message::new(format!("event #{i}")).with_attribute("seq", i.to_string());
        topic.publish(&cancel, &msg).await?;
    }
    publisher.close().await?;
    println!("Wrote {}", root.join("events").display());

    let subscriber = bps::new_subscriber(&cancel, &url).await?;
    let sub = subscriber
        .topic("events")
        .subscribe(
            Box::new(handler_fn(|msg: &Message| {
                println!(
                    "{} (seq={})",
                    String::from_utf8_lossy(msg.data()),
                    msg.attribute("seq").unwrap_or("-")
                );
                Flow::Continue
            })),
            SubOptions::default(),
        )
        .await?;
    sub.wait().await?;
    subscriber.close().await?;
    Ok(())
}
