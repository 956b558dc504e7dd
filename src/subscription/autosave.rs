use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum SaveMessage {
    /// Something changed; save within the window
    Request,
    /// Save now if anything is pending, then acknowledge
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the debounced save task
#[derive(Clone, Debug)]
pub struct AutoSaverHandle {
    tx: mpsc::UnboundedSender<SaveMessage>,
}

impl AutoSaverHandle {
    pub fn request(&self) {
        let _ = self.tx.send(SaveMessage::Request);
    }

    /// Wait until pending changes are written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SaveMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SaveMessage::Shutdown);
    }
}

/// Coalesces save requests: the first request opens a window and every
/// request arriving before it closes is covered by the same save.
///
/// The save itself runs on the blocking pool.
pub struct AutoSaver<F> {
    window: Duration,
    save: Arc<F>,
    rx: mpsc::UnboundedReceiver<SaveMessage>,
}

impl<F: Fn() + Send + Sync + 'static> AutoSaver<F> {
    pub fn new(window: Duration, save: F) -> (Self, AutoSaverHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let saver = Self {
            window,
            save: Arc::new(save),
            rx,
        };
        (saver, AutoSaverHandle { tx })
    }

    async fn save(&self) {
        let save = self.save.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || save()).await {
            error!(error = %e, "Save task failed");
        }
    }

    pub async fn run(mut self) {
        let mut deadline: Option<Instant> = None;

        loop {
            let msg = match deadline {
                Some(at) => match tokio::time::timeout_at(at, self.rx.recv()).await {
                    Ok(msg) => msg,
                    Err(_) => {
                        deadline = None;
                        self.save().await;
                        continue;
                    }
                },
                None => self.rx.recv().await,
            };

            match msg {
                Some(SaveMessage::Request) => {
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + self.window);
                    }
                }
                Some(SaveMessage::Flush(ack)) => {
                    if deadline.take().is_some() {
                        self.save().await;
                    }
                    let _ = ack.send(());
                }
                Some(SaveMessage::Shutdown) | None => {
                    if deadline.is_some() {
                        self.save().await;
                    }
                    debug!("Autosaver stopped");
                    break;
                }
            }
        }
    }
}

pub fn spawn_autosaver<F: Fn() + Send + Sync + 'static>(
    window: Duration,
    save: F,
) -> (AutoSaverHandle, JoinHandle<()>) {
    let (saver, handle) = AutoSaver::new(window, save);
    let task = tokio::spawn(saver.run());
    (handle, task)
}
