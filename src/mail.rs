//! Outbound mail collaborator.
//!
//! The real delivery channel (SMTP, a provider API) lives outside this
//! crate; handlers only see the [`Mailer`] trait. [`LogMailer`] is the
//! default stand-in and [`MemoryMailer`] records messages for tests.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
};

pub trait Mailer: Send + Sync + 'static {
    fn send(
        &self,
        to: String,
        subject: String,
        body: String,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send + '_>>;
}

/// Writes outbound mail to the log instead of a wire.
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

impl Mailer for LogMailer {
    fn send(
        &self,
        to: String,
        subject: String,
        body: String,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                from = %self.sender,
                to = %to,
                subject = %subject,
                body_len = body.len(),
                "outbound mail"
            );
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records every message in memory; intended for tests.
#[derive(Default, Clone)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }
}

impl Mailer for MemoryMailer {
    fn send(
        &self,
        to: String,
        subject: String,
        body: String,
    ) -> Pin<Box<dyn Future<Output = eyre::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.sent
                .lock()
                .expect("mailer lock poisoned")
                .push(SentMail { to, subject, body });
            Ok(())
        })
    }
}
