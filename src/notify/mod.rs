//! Outbound result notifications
//!
//! Fire-and-forget webhook delivery of finished-match reports. Delivery
//! runs on its own task so a slow or dead endpoint never backs up the
//! outcome pipeline; failures are logged and not retried.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::room::MatchOutcome;

#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<MatchOutcome>>,
}

impl Notifier {
    /// Spawn the delivery task. With no webhook configured the notifier
    /// is inert and `publish` is a no-op.
    pub fn spawn(webhook_url: Option<String>) -> Self {
        let Some(url) = webhook_url else {
            return Self { tx: None };
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<MatchOutcome>();

        tokio::spawn(async move {
            let client = reqwest::Client::new();
            while let Some(outcome) = rx.recv().await {
                let result = client.post(&url).json(&outcome).send().await;
                match result {
                    Ok(response) if response.status().is_success() => {
                        debug!(room_id = %outcome.room_id, "Result webhook delivered");
                    }
                    Ok(response) => {
                        warn!(
                            room_id = %outcome.room_id,
                            status = %response.status(),
                            "Result webhook rejected"
                        );
                    }
                    Err(err) => {
                        warn!(
                            room_id = %outcome.room_id,
                            error = %err,
                            "Result webhook delivery failed"
                        );
                    }
                }
            }
        });

        Self { tx: Some(tx) }
    }

    pub fn publish(&self, outcome: &MatchOutcome) {
        if let Some(tx) = &self.tx {
            if tx.send(outcome.clone()).is_err() {
                warn!(room_id = %outcome.room_id, "Notifier task is gone");
            }
        }
    }
}
