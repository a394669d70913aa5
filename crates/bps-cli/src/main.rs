use anyhow::{Context, Result};
use bps::{handler_fn, CancellationToken, Flow, Message, StartAt, SubOptions};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bps", about = "Publish to and tail topics on any bps backend")]
struct Cli {
    /// Log filter, e.g. `debug` or `bps_transport=trace` (default: RUST_LOG, then `warn`)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one message per DATA argument, as a single batch
    Publish {
        /// Backend URL, e.g. file:///var/lib/bps
        #[arg(long)]
        url: String,
        #[arg(long)]
        topic: String,
        /// Message ID applied to every message
        #[arg(long)]
        id: Option<String>,
        /// Attribute as key=value (repeatable)
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
        #[arg(required = true)]
        data: Vec<String>,
    },
    /// Print messages as JSON lines until the topic is exhausted
    Tail {
        /// Backend URL, e.g. file:///var/lib/bps
        #[arg(long)]
        url: String,
        #[arg(long)]
        topic: String,
        /// Stop after this many messages
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,
        /// oldest or newest
        #[arg(long, default_value = "oldest")]
        start_at: StartAt,
    },
}

fn parse_attr(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Publish {
            url,
            topic,
            id,
            attrs,
            data,
        } => {
            let messages: Vec<Message> = data
                .into_iter()
                .map(|d| {
                    let mut msg = Message::new(d);
                    msg.id = id.clone();
                    msg.attributes.extend(attrs.iter().cloned());
                    msg
                })
                .collect();

            let publisher = bps::new_publisher(&cancel, &url)
                .await
                .with_context(|| format!("open publisher for {url}"))?;
            let published = publisher.topic(&topic).publish_batch(&cancel, &messages).await;
            let closed = publisher.close().await;
            published.with_context(|| format!("publish to {topic}"))?;
            closed.context("close publisher")?;
            eprintln!("Published {} message(s) to {}", messages.len(), topic);
        }
        Commands::Tail {
            url,
            topic,
            limit,
            start_at,
        } => {
            let subscriber = bps::new_subscriber(&cancel, &url)
                .await
                .with_context(|| format!("open subscriber for {url}"))?;

            let mut printed = 0u64;
            let handler = handler_fn(move |msg: &Message| {
                match serde_json::to_string(msg) {
                    Ok(line) => println!("{line}"),
                    Err(e) => return Flow::abort(e),
                }
                printed += 1;
                if limit.is_some_and(|n| printed >= n) {
                    Flow::Done
                } else {
                    Flow::Continue
                }
            });

            let options = SubOptions::default().start_at(start_at).cancel_on(cancel.clone());
            let sub = subscriber
                .topic(&topic)
                .subscribe(Box::new(handler), options)
                .await
                .with_context(|| format!("subscribe to {topic}"))?;
            let outcome = sub.wait().await;
            subscriber.close().await.context("close subscriber")?;

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => tracing::debug!("tail cancelled"),
                Err(e) => return Err(e).with_context(|| format!("tail {topic}")),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attr() {
        assert_eq!(parse_attr("k=v=w").unwrap(), ("k".to_string(), "v=w".to_string()));
        assert_eq!(parse_attr("k=").unwrap(), ("k".to_string(), String::new()));
        assert!(parse_attr("=v").is_err());
        assert!(parse_attr("novalue").is_err());
    }

    #[test]
    fn test_parse_publish() {
        let cli = Cli::try_parse_from([
            "bps", "publish", "--url", "file:///tmp/x", "--topic", "t", "--attr", "a=1", "--attr", "b=2", "one", "two",
        ])
        .unwrap();
        let Commands::Publish { attrs, data, id, .. } = cli.command else {
            panic!("expected publish");
        };
        assert_eq!(attrs.len(), 2);
        assert_eq!(data, ["one", "two"]);
        assert!(id.is_none());
    }

    #[test]
    fn test_parse_tail() {
        let cli = Cli::try_parse_from(["bps", "tail", "--url", "file:///tmp/x", "--topic", "t", "--limit", "3"]).unwrap();
        let Commands::Tail { limit, start_at, .. } = cli.command else {
            panic!("expected tail");
        };
        assert_eq!(limit, Some(3));
        assert_eq!(start_at, StartAt::Oldest);

        assert!(Cli::try_parse_from(["bps", "tail", "--url", "u", "--topic", "t", "--limit", "0"]).is_err());
        assert!(Cli::try_parse_from(["bps", "tail", "--url", "u", "--topic", "t", "--start-at", "later"]).is_err());
        assert!(Cli::try_parse_from(["bps", "publish", "--url", "u", "--topic", "t"]).is_err());
    }
}
