//! Outbound side effects: resale notifications and on-chain ownership hooks.
//!
//! Both are emitted only after the ticket change they describe has been stored.
//! Neither can fail an engine operation: publish errors are logged, and token
//! bridge calls run detached on the tokio runtime.

use crate::types::{Currency, EventId, IdentityId, Money, TicketId, TransferKind};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors raised by notification collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The downstream system rejected or dropped the message
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The downstream system could not be reached
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by notification collaborators.
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Message describing a change to the resale market.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResaleNotification {
    /// A ticket was offered for resale
    Listed {
        /// Listed ticket
        ticket_id: TicketId,
        /// Its event
        event_id: EventId,
        /// Asking price
        price: Money,
        /// Currency of the asking price
        currency: Currency,
    },
    /// A listing was withdrawn without a sale
    Delisted {
        /// Ticket that is no longer offered
        ticket_id: TicketId,
        /// Its event
        event_id: EventId,
    },
    /// A listed ticket was bought
    Sold {
        /// Sold ticket
        ticket_id: TicketId,
        /// Its event
        event_id: EventId,
        /// Price paid
        price: Money,
        /// Previous owner
        seller: IdentityId,
        /// New owner
        buyer: IdentityId,
    },
}

impl ResaleNotification {
    /// Ticket the notification is about
    #[must_use]
    pub const fn ticket_id(&self) -> TicketId {
        match self {
            Self::Listed { ticket_id, .. } | Self::Delisted { ticket_id, .. } | Self::Sold { ticket_id, .. } => {
                *ticket_id
            },
        }
    }
}

/// Publishes resale notifications to an external pub/sub system.
pub trait ResalePublisher: Send + Sync {
    /// Publish one notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the message could not be handed off.
    fn publish(&self, notification: ResaleNotification) -> NotifyFuture<'_>;
}

/// Ownership change handed to the token bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipChange {
    /// Ticket that changed hands
    pub ticket_id: TicketId,
    /// Its event
    pub event_id: EventId,
    /// Previous owner
    pub from: IdentityId,
    /// New owner
    pub to: IdentityId,
    /// Transfer or resale
    pub kind: TransferKind,
}

/// Optional on-chain mirror of ticket ownership.
pub trait TokenBridge: Send + Sync {
    /// Mirror an ownership change.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the change could not be submitted.
    fn record_ownership_change(&self, change: OwnershipChange) -> NotifyFuture<'_>;
}

/// Publisher that drops every message.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopResalePublisher;

impl ResalePublisher for NoopResalePublisher {
    fn publish(&self, _notification: ResaleNotification) -> NotifyFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// Bridge that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTokenBridge;

impl TokenBridge for NoopTokenBridge {
    fn record_ownership_change(&self, _change: OwnershipChange) -> NotifyFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

/// In-process publisher that records every message and fans it out to subscribers.
#[derive(Clone, Debug)]
pub struct InMemoryResalePublisher {
    published: Arc<RwLock<Vec<ResaleNotification>>>,
    sender: broadcast::Sender<ResaleNotification>,
}

impl InMemoryResalePublisher {
    /// Create a publisher whose subscribers buffer up to `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            published: Arc::new(RwLock::new(Vec::new())),
            sender,
        }
    }

    /// Receive every notification published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ResaleNotification> {
        self.sender.subscribe()
    }

    /// Everything published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<ResaleNotification> {
        match self.published.read() {
            Ok(published) => published.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for InMemoryResalePublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ResalePublisher for InMemoryResalePublisher {
    fn publish(&self, notification: ResaleNotification) -> NotifyFuture<'_> {
        let result = self
            .published
            .write()
            .map_err(|_| NotifyError::Unavailable("publisher lock poisoned".to_string()))
            .map(|mut published| {
                published.push(notification.clone());
                // No receivers is fine
                let _ = self.sender.send(notification);
            });
        Box::pin(futures::future::ready(result))
    }
}

/// Publish after a successful change, logging instead of failing.
pub(crate) async fn publish_logged(publisher: &dyn ResalePublisher, notification: ResaleNotification) {
    let ticket_id = notification.ticket_id();
    if let Err(error) = publisher.publish(notification).await {
        tracing::warn!(%ticket_id, %error, "Failed to publish resale notification");
    }
}

/// Hand an ownership change to the bridge without waiting for it.
pub(crate) fn spawn_ownership_change(bridge: &Arc<dyn TokenBridge>, change: OwnershipChange) {
    let bridge = Arc::clone(bridge);
    tokio::spawn(async move {
        let ticket_id = change.ticket_id;
        if let Err(error) = bridge.record_ownership_change(change).await {
            tracing::warn!(%ticket_id, %error, "Token bridge rejected ownership change");
        }
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn in_memory_publisher_records_and_broadcasts() {
        let publisher = InMemoryResalePublisher::default();
        let mut receiver = publisher.subscribe();
        let notification = ResaleNotification::Delisted {
            ticket_id: TicketId::new(),
            event_id: EventId::new(),
        };

        publisher.publish(notification.clone()).await.unwrap();

        assert_eq!(publisher.published(), vec![notification.clone()]);
        assert_eq!(receiver.recv().await.unwrap(), notification);
    }

    #[test]
    fn notifications_serialize_with_a_type_tag() {
        let notification = ResaleNotification::Listed {
            ticket_id: TicketId::new(),
            event_id: EventId::new(),
            price: Money::from_minor(1500),
            currency: Currency::usd(),
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "listed");
        assert_eq!(json["price"], 1500);
    }
}
