//! User-facing notifications (toasts and banners) raised by bindings.

use tokio::sync::broadcast;
use tracing::debug;

use crate::mutation::Mutation;

const NOTICE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Clone)]
pub struct Notices {
    tx: broadcast::Sender<Notice>,
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}

impl Notices {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn success(&self, message: impl Into<String>) {
        self.publish(NoticeLevel::Success, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(NoticeLevel::Error, message.into());
    }

    fn publish(&self, level: NoticeLevel, message: String) {
        if self.tx.send(Notice { level, message }).is_err() {
            debug!(?level, "notice: no listeners");
        }
    }

    /// Routes a mutation's outcome to this channel.
    pub fn attach<I, O>(
        &self,
        mutation: Mutation<I, O>,
        success_message: &'static str,
    ) -> Mutation<I, O>
    where
        I: Send + 'static,
        O: Send + Sync + 'static,
    {
        let on_success = self.clone();
        let on_error = self.clone();
        mutation
            .on_success(move |_| on_success.success(success_message))
            .on_error(move |message| on_error.error(message))
    }
}
