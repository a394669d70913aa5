//! File-system backend: one append-only log file per topic under a root
//! directory.
//!
//! Every message is stored as one JSON object followed by a newline:
//!
//! ```text
//! {"id":"a1","data":"aGVsbG8=","attributes":{"k":"v"}}
//! {"data":"d29ybGQ="}
//! ```
//!
//! The subscriber replays a whole file from the beginning and assumes it is
//! no longer being written to. It does not track what was already consumed.

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bps_core::{
    Delivery, Dispatcher, Error, ErrorHandler, Handler, Message, PubTopic, Publisher, Result, StartAt, SubOptions,
    SubTopic, Subscriber, Subscription, TopicCache,
};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

/// Records decoded ahead of the handler.
const READ_AHEAD: usize = 16;

/// Publisher writing to `<root>/<topic>`.
#[derive(Debug)]
pub struct FilePublisher {
    root: PathBuf,
    topics: TopicCache<FileTopic>,
    closed: Arc<AtomicBool>,
    close_result: OnceCell<Result<()>>,
}

impl FilePublisher {
    /// Create `root` (and any missing parents) and open a publisher in it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "file publisher opened");
        Ok(Self {
            root,
            topics: TopicCache::new(),
            closed: Arc::new(AtomicBool::new(false)),
            close_result: OnceCell::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Typed handle to `name`.
    pub fn file_topic(&self, name: &str) -> Arc<FileTopic> {
        self.topics.get_or_create(name, |name| FileTopic {
            name: name.to_string(),
            path: self.root.join(name),
            publisher_closed: self.closed.clone(),
            file: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Publisher for FilePublisher {
    fn topic(&self, name: &str) -> Arc<dyn PubTopic> {
        self.file_topic(name)
    }

    /// Sync and close every open file. Returns the last error encountered.
    async fn close(&self) -> Result<()> {
        self.close_result
            .get_or_init(|| async {
                self.closed.store(true, Ordering::Release);
                let mut result = Ok(());
                for (name, topic) in self.topics.drain() {
                    if let Err(e) = topic.close().await {
                        tracing::warn!(topic = %name, error = %e, "closing topic file failed");
                        result = Err(e);
                    }
                }
                result
            })
            .await
            .clone()
    }
}

/// Publisher handle to a single log file.
#[derive(Debug)]
pub struct FileTopic {
    name: String,
    path: PathBuf,
    publisher_closed: Arc<AtomicBool>,
    file: Mutex<Option<File>>,
}

impl FileTopic {
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_all(&self, cancel: &CancellationToken, batch: &[Message], wrap: bool) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut guard = self.file.lock().await;
        if self.publisher_closed.load(Ordering::Acquire) {
            return Err(Error::Closed(format!("file topic {:?}", self.name)));
        }
        let file = match guard.take() {
            Some(file) => file,
            None => OpenOptions::new().create(true).append(true).open(&self.path).await?,
        };
        let file = guard.insert(file);

        // End of the last complete record; a failed append is cut back to it.
        let mut end = file.metadata().await?.len();
        for (index, msg) in batch.iter().enumerate() {
            match append(file, msg).await {
                Ok(written) => end += written,
                Err(e) => {
                    truncate_to(file, end, &self.name).await;
                    return Err(if wrap { Error::batch(index, batch.len(), e) } else { e });
                }
            }
        }
        file.sync_all().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut file) = self.file.lock().await.take() else {
            return Ok(());
        };
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Write one record and flush it, so a failure is attributed to this record.
async fn append(file: &mut File, msg: &Message) -> Result<u64> {
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(line.len() as u64)
}

/// Drop whatever a failed write left past `len`.
async fn truncate_to(file: &mut File, len: u64, topic: &str) {
    if let Err(e) = file.set_len(len).await {
        tracing::warn!(topic = %topic, error = %e, "cannot remove partial record");
    }
}

#[async_trait]
impl PubTopic for FileTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, cancel: &CancellationToken, msg: &Message) -> Result<()> {
        self.write_all(cancel, std::slice::from_ref(msg), false).await
    }

    /// Append the whole batch under one lock and sync once.
    async fn publish_batch(&self, cancel: &CancellationToken, batch: &[Message]) -> Result<()> {
        self.write_all(cancel, batch, true).await
    }
}

/// Subscriber replaying `<root>/<topic>` from the first record.
///
/// Clones share topic handles.
#[derive(Debug, Clone)]
pub struct FileSubscriber {
    root: PathBuf,
    topics: Arc<TopicCache<FileSubTopic>>,
}

impl FileSubscriber {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            topics: Arc::default(),
        }
    }
}

#[async_trait]
impl Subscriber for FileSubscriber {
    fn topic(&self, name: &str) -> Arc<dyn SubTopic> {
        self.topics.get_or_create(name, |name| FileSubTopic {
            name: name.to_string(),
            path: self.root.join(name),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct FileSubTopic {
    name: String,
    path: PathBuf,
}

#[async_trait]
impl SubTopic for FileSubTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, handler: Box<dyn Handler>, options: SubOptions) -> Result<Subscription> {
        options.resolve_start(StartAt::Oldest, &[StartAt::Oldest])?;

        let file = match File::open(&self.path).await {
            Ok(file) => Some(file.into_std().await),
            // Nothing published yet: the subscription ends straight away.
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let on_error = options.error_handler.clone();
        Ok(Subscription::spawn(&self.name, handler, &options, move |dispatcher| async move {
            match file {
                Some(file) => replay(file, dispatcher, on_error).await,
                None => Ok(()),
            }
        }))
    }
}

async fn replay(file: std::fs::File, dispatcher: Dispatcher, on_error: ErrorHandler) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(READ_AHEAD);
    let reader = tokio::task::spawn_blocking(move || decode(file, tx));

    let outcome = loop {
        let record = tokio::select! {
            _ = dispatcher.token().cancelled() => break Err(Error::Cancelled),
            record = rx.recv() => record,
        };
        let msg = match record {
            None => break Ok(()),
            Some(Ok(msg)) => msg,
            Some(Err(Error::Codec(e))) if e.is_eof() => {
                // Trailing record cut short, most likely by a crashed writer.
                let err = Error::Codec(e);
                tracing::warn!(error = %err, "truncated record at end of file");
                on_error(&err);
                break Ok(());
            }
            Some(Err(e)) => break Err(e),
        };

        if dispatcher.token().is_cancelled() {
            break Err(Error::Cancelled);
        }
        match dispatcher.dispatch(&msg).await {
            Delivery::Ack => {}
            Delivery::Discarded => break Err(Error::Cancelled),
            Delivery::AckAndStop | Delivery::Reject => break Ok(()),
        }
    };

    // The reader stops at its next send once the receiver is gone.
    drop(rx);
    if let Err(e) = reader.await {
        tracing::warn!(error = %e, "file reader task failed");
    }
    outcome
}

/// Stream records off `file` until EOF, the first decode error, or until
/// the consume loop hangs up.
fn decode(file: std::fs::File, tx: mpsc::Sender<Result<Message>>) {
    let records = serde_json::Deserializer::from_reader(BufReader::new(file)).into_iter::<Message>();
    for record in records {
        let record = record.map_err(Error::from);
        let failed = record.is_err();
        if tx.blocking_send(record).is_err() || failed {
            return;
        }
    }
}
