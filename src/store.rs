//! Persistence contracts owned by the embedding application.
//!
//! The orchestrator never defines a storage schema; it reads and writes
//! credentials, listing links, and the sanitized SKU through these traits.
//! [`InMemoryStore`] backs the test suites and is handy for prototyping.

use crate::models::{Listing, Marketplace, MarketplaceCredential, RemoteListingLink};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(
        &self,
        user_id: i64,
        marketplace: Marketplace,
    ) -> Result<Option<MarketplaceCredential>, StoreError>;

    async fn save_credential(
        &self,
        user_id: i64,
        marketplace: Marketplace,
        credential: MarketplaceCredential,
    ) -> Result<(), StoreError>;

    /// Explicit disconnect destroys the credential.
    async fn delete_credential(
        &self,
        user_id: i64,
        marketplace: Marketplace,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ListingLinkStore: Send + Sync {
    async fn get_link(
        &self,
        listing_id: i64,
        marketplace: Marketplace,
    ) -> Result<Option<RemoteListingLink>, StoreError>;

    /// Keyed by (listing_id, marketplace): an existing row is updated in
    /// place, never duplicated.
    async fn upsert_link(&self, link: RemoteListingLink) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Write the sanitized SKU back onto the listing so the UI reflects it
    /// even when a later pipeline step fails.
    async fn persist_sku(&self, listing_id: i64, sku: &str) -> Result<(), StoreError>;

    /// Look a listing up by its marketplace SKU, scoped to one owner. Used by
    /// inventory sync to match remote items back to local listings.
    async fn find_listing_by_sku(
        &self,
        owner_id: i64,
        sku: &str,
    ) -> Result<Option<Listing>, StoreError>;
}

/// HashMap-backed store implementing all three contracts.
#[derive(Default)]
pub struct InMemoryStore {
    credentials: Mutex<HashMap<(i64, Marketplace), MarketplaceCredential>>,
    links: Mutex<HashMap<(i64, Marketplace), RemoteListingLink>>,
    skus: Mutex<HashMap<i64, String>>,
    listings: Mutex<HashMap<i64, Listing>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn links(&self) -> Vec<RemoteListingLink> {
        self.links.lock().await.values().cloned().collect()
    }

    pub async fn sku_of(&self, listing_id: i64) -> Option<String> {
        self.skus.lock().await.get(&listing_id).cloned()
    }

    pub async fn add_listing(&self, listing: Listing) {
        self.listings.lock().await.insert(listing.id, listing);
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn get_credential(
        &self,
        user_id: i64,
        marketplace: Marketplace,
    ) -> Result<Option<MarketplaceCredential>, StoreError> {
        Ok(self.credentials.lock().await.get(&(user_id, marketplace)).cloned())
    }

    async fn save_credential(
        &self,
        user_id: i64,
        marketplace: Marketplace,
        credential: MarketplaceCredential,
    ) -> Result<(), StoreError> {
        self.credentials
            .lock()
            .await
            .insert((user_id, marketplace), credential);
        Ok(())
    }

    async fn delete_credential(
        &self,
        user_id: i64,
        marketplace: Marketplace,
    ) -> Result<(), StoreError> {
        self.credentials.lock().await.remove(&(user_id, marketplace));
        Ok(())
    }
}

#[async_trait]
impl ListingLinkStore for InMemoryStore {
    async fn get_link(
        &self,
        listing_id: i64,
        marketplace: Marketplace,
    ) -> Result<Option<RemoteListingLink>, StoreError> {
        Ok(self.links.lock().await.get(&(listing_id, marketplace)).cloned())
    }

    async fn upsert_link(&self, link: RemoteListingLink) -> Result<(), StoreError> {
        self.links
            .lock()
            .await
            .insert((link.listing_id, link.marketplace), link);
        Ok(())
    }
}

#[async_trait]
impl ListingStore for InMemoryStore {
    async fn persist_sku(&self, listing_id: i64, sku: &str) -> Result<(), StoreError> {
        self.skus.lock().await.insert(listing_id, sku.to_string());
        Ok(())
    }

    async fn find_listing_by_sku(
        &self,
        owner_id: i64,
        sku: &str,
    ) -> Result<Option<Listing>, StoreError> {
        // A SKU written back through persist_sku wins over the one the
        // listing was seeded with.
        let skus = self.skus.lock().await;
        let listings = self.listings.lock().await;
        Ok(listings
            .values()
            .find(|listing| {
                listing.owner_id == owner_id
                    && skus
                        .get(&listing.id)
                        .map(String::as_str)
                        .or(listing.sku.as_deref())
                        == Some(sku)
            })
            .cloned())
    }
}
