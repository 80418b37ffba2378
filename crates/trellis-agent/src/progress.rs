//! Bounded progress channel between a running workflow and its consumer.
//!
//! The terminal methods consume the sender, so no event can follow
//! `final-response` or `error` and the channel closes right after.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use trellis_core::types::ProgressEvent;

pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx }, ProgressReceiver { rx })
}

/// Engine side of the progress channel.
#[derive(Debug)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSender {
    async fn emit(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Progress receiver dropped, discarding event");
        }
    }

    pub async fn node_executing(&self, node_id: &str) {
        self.emit(ProgressEvent::NodeExecuting {
            node_id: node_id.to_string(),
        })
        .await;
    }

    pub async fn node_finished(&self, node_id: &str, content: &str) {
        self.emit(ProgressEvent::NodeFinished {
            node_id: node_id.to_string(),
            content: content.to_string(),
        })
        .await;
    }

    pub async fn final_response(self, content: impl Into<String>) {
        self.emit(ProgressEvent::FinalResponse {
            content: content.into(),
        })
        .await;
    }

    pub async fn error(self, error: impl Into<String>) {
        self.emit(ProgressEvent::Error {
            error: error.into(),
        })
        .await;
    }
}

/// Consumer side of the progress channel.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressReceiver {
    /// Next event, or `None` once the run has finished and the buffer is drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<ProgressEvent> {
        ReceiverStream::new(self.rx)
    }

    /// Drain every remaining event until the channel closes.
    pub async fn collect(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}
