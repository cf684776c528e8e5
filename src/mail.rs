//! Outgoing mail.
//!
//! The server only needs to hand a finished message to something that can
//! deliver it. Delivery failures surface as [`Error::Mail`] and callers
//! decide whether they are fatal.

use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, message: &Message) -> Result<()>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &Message) -> Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "Mail from {}:\n{}",
            message.from,
            message.body
        );
        Ok(())
    }
}

/// Keeps sent messages in memory. Can be switched to fail every delivery.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Message>>,
    failing: bool,
}

impl MemoryMailer {
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[must_use]
    pub fn last(&self) -> Option<Message> {
        self.sent().pop()
    }
}

impl Mailer for MemoryMailer {
    fn send(&self, message: &Message) -> Result<()> {
        if self.failing {
            return Err(Error::Mail(format!("cannot reach mail relay for {}", message.to)));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message {
            from: "system@localhost".into(),
            to: "alice@example.com".into(),
            subject: "Hello".into(),
            body: "Body".into(),
        }
    }

    #[test]
    fn test_memory_mailer_records() {
        let mailer = MemoryMailer::default();
        mailer.send(&message()).unwrap();
        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(mailer.last().unwrap().to, "alice@example.com");
    }

    #[test]
    fn test_failing_mailer() {
        let mailer = MemoryMailer::failing();
        assert!(matches!(mailer.send(&message()), Err(Error::Mail(_))));
        assert!(mailer.sent().is_empty());
    }
}
