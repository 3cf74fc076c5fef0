//! Identity lookups used by transfers and issuance.

use crate::store::StoreFuture;
use crate::types::{Attendee, IdentityId, Recipient};
use futures::future;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use ticketing_core::StoreError;

/// Resolves recipients and supplies default attendee details.
pub trait IdentityDirectory: Send + Sync {
    /// Resolve a recipient to a known identity.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the directory could not be reached
    fn resolve(&self, recipient: &Recipient) -> StoreFuture<'_, Option<IdentityId>>;

    /// Profile used as the attendee when a purchase gives none.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the directory could not be reached
    fn profile(&self, identity: IdentityId) -> StoreFuture<'_, Option<Attendee>>;
}

#[derive(Debug, Default)]
struct Entries {
    profiles: HashMap<IdentityId, Attendee>,
    by_email: HashMap<String, IdentityId>,
    by_wallet: HashMap<String, IdentityId>,
}

/// In-memory [`IdentityDirectory`]. Clones share entries.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDirectory {
    entries: Arc<RwLock<Entries>>,
}

impl InMemoryDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity with its display name and optional email.
    ///
    /// Emails are matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the lock is poisoned.
    pub fn register(
        &self,
        identity: IdentityId,
        name: impl Into<String>,
        email: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Unavailable("directory lock poisoned".to_string()))?;
        if let Some(email) = email {
            entries.by_email.insert(email.to_ascii_lowercase(), identity);
        }
        entries
            .profiles
            .insert(identity, Attendee::new(name, email.map(str::to_string)));
        Ok(())
    }

    /// Link a wallet address to a registered identity.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the lock is poisoned.
    pub fn link_wallet(&self, identity: IdentityId, wallet: impl Into<String>) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Unavailable("directory lock poisoned".to_string()))?;
        entries.by_wallet.insert(wallet.into(), identity);
        Ok(())
    }

    fn lookup(&self, recipient: &Recipient) -> Result<Option<IdentityId>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Unavailable("directory lock poisoned".to_string()))?;
        Ok(match recipient {
            Recipient::Identity(identity) => entries.profiles.contains_key(identity).then_some(*identity),
            Recipient::Email(email) => entries.by_email.get(&email.to_ascii_lowercase()).copied(),
            Recipient::Wallet(wallet) => entries.by_wallet.get(wallet).copied(),
        })
    }
}

impl IdentityDirectory for InMemoryDirectory {
    fn resolve(&self, recipient: &Recipient) -> StoreFuture<'_, Option<IdentityId>> {
        Box::pin(future::ready(self.lookup(recipient)))
    }

    fn profile(&self, identity: IdentityId) -> StoreFuture<'_, Option<Attendee>> {
        let result = self
            .entries
            .read()
            .map_err(|_| StoreError::Unavailable("directory lock poisoned".to_string()))
            .map(|entries| entries.profiles.get(&identity).cloned());
        Box::pin(future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn resolves_by_email_wallet_and_identity() {
        let directory = InMemoryDirectory::new();
        let bob = IdentityId::new();
        directory.register(bob, "Bob", Some("Bob@Example.com")).unwrap();
        directory.link_wallet(bob, "0xb0b").unwrap();

        let by_email = directory.resolve(&Recipient::Email("bob@example.com".into())).await.unwrap();
        let by_wallet = directory.resolve(&Recipient::Wallet("0xb0b".into())).await.unwrap();
        let by_id = directory.resolve(&Recipient::Identity(bob)).await.unwrap();

        assert_eq!(by_email, Some(bob));
        assert_eq!(by_wallet, Some(bob));
        assert_eq!(by_id, Some(bob));
    }

    #[tokio::test]
    async fn unknown_recipients_do_not_resolve() {
        let directory = InMemoryDirectory::new();
        let stranger = Recipient::Identity(IdentityId::new());
        assert_eq!(directory.resolve(&stranger).await.unwrap(), None);
        assert_eq!(
            directory.resolve(&Recipient::Email("nobody@example.com".into())).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn profile_carries_name_and_email() {
        let directory = InMemoryDirectory::new();
        let ada = IdentityId::new();
        directory.register(ada, "Ada", Some("ada@example.com")).unwrap();
        let profile = directory.profile(ada).await.unwrap().unwrap();
        assert_eq!(profile.name, "Ada");
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
    }
}
