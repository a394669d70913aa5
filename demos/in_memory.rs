//! In-memory example: capture published messages, then replay seeded ones.
//!
//! Nothing leaves the process, which makes this backend the usual choice in
//! unit tests of code that publishes or consumes.
//!
//! Usage:
//!   cargo run --example in_memory

use anyhow::Result;
use bps::{handler_fn, CancellationToken, Flow, InMemPublisher, InMemSubscriber, Message, Publisher, SubOptions, Subscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cancel = CancellationToken::new();

    let publisher = InMemPublisher::new();
    publisher
        .topic("greetings")
        .publish_batch(&cancel, &[Message::new("hello"), Message::new("bonjour").with_id("fr")])
        .await?;
    for msg in publisher.messages("greetings") {
        println!("captured: {}", String::from_utf8_lossy(msg.data()));
    }

    // Replay what was captured; stop after the first message.
    let subscriber: InMemSubscriber = [("greetings", publisher.messages("greetings"))].into_iter().collect();
    let sub = subscriber
        .topic("greetings")
        .subscribe(
            Box::new(handler_fn(|msg: &Message| {
                println!("handled: {}", String::from_utf8_lossy(msg.data()));
                Flow::Done
            })),
            SubOptions::default(),
        )
        .await?;
    sub.wait().await?;
    println!("still pending: {}", subscriber.pending("greetings"));

    subscriber.close().await?;
    publisher.close().await?;
    Ok(())
}
