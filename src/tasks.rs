//! The task catalog: payload types and handlers for every task type this
//! backend produces.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    broker::DeliveryId,
    distributor::TaskDistributor,
    error::Error,
    mail::Mailer,
    registry::{HandlerFuture, HandlerRegistry, TaskHandler},
    task::EnqueueOptions,
};

pub const TASK_SEND_VERIFY_EMAIL: &str = "task:send_verify_email";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerifyEmailPayload {
    pub username: String,
    pub email: String,
}

/// Sends the account verification email for a freshly registered user.
pub struct VerifyEmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl VerifyEmailHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

impl TaskHandler for VerifyEmailHandler {
    fn handle(&self, payload: &[u8]) -> HandlerFuture<'_> {
        let payload = payload.to_vec();

        Box::pin(async move {
            // Undecodable bytes will never decode on a later attempt, so the
            // serde error's non-retryable classification stands.
            let payload: VerifyEmailPayload = serde_json::from_slice(&payload)?;

            let subject = "Welcome to ledgerbank".to_owned();
            let body = format!(
                "Hello {}, please verify your email address to activate your account.",
                payload.username
            );

            self.mailer
                .send(payload.email, subject, body)
                .await
                .map_err(Error::handler)?;

            Ok(())
        })
    }
}

/// The registry the daemon runs: every task type known at startup.
pub fn default_registry(mailer: Arc<dyn Mailer>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(TASK_SEND_VERIFY_EMAIL, VerifyEmailHandler::new(mailer));
    registry
}

impl TaskDistributor {
    /// Producer call site for registration flows.
    pub async fn distribute_verify_email(
        &self,
        payload: &VerifyEmailPayload,
        opts: EnqueueOptions,
    ) -> Result<DeliveryId, Error> {
        self.distribute(TASK_SEND_VERIFY_EMAIL, payload, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MemoryMailer;

    #[tokio::test]
    async fn verify_email_handler_sends_mail() {
        let mailer = MemoryMailer::new();
        let handler = VerifyEmailHandler::new(Arc::new(mailer.clone()));

        let payload = serde_json::to_vec(&VerifyEmailPayload {
            username: "alice".to_owned(),
            email: "alice@example.com".to_owned(),
        })
        .unwrap();

        handler.handle(&payload).await.unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
        assert!(sent[0].body.contains("alice"));
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_permanent_failure() {
        let handler = VerifyEmailHandler::new(Arc::new(MemoryMailer::new()));

        let err = handler.handle(b"not json").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
