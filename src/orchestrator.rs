//! Top-level facade wiring configuration, stores, and both marketplace
//! pipelines behind one publish entry point.

use crate::config::{EbayConfig, PoshmarkConfig};
use crate::diagnostics::DiagnosticSink;
use crate::ebay::{
    InventoryItemSummary, PolicyResolver, PublishPipeline, RestApiGateway, SyncReport,
    TokenRefresher,
};
use crate::error::PublishError;
use crate::models::{
    LinkStatus, Listing, Marketplace, MarketplaceKind, PublishResult, RemoteListingLink,
    ScrapedItem,
};
use crate::poshmark::{AutomationPublisher, BrowserSessionManager, InventoryScraper};
use crate::store::{CredentialStore, ListingLinkStore, ListingStore};
use std::sync::Arc;
use tracing::warn;

pub struct Orchestrator {
    ebay: Arc<PublishPipeline>,
    poshmark: Arc<AutomationPublisher>,
    scraper: Arc<InventoryScraper>,
    sessions: Arc<BrowserSessionManager>,
    links: Arc<dyn ListingLinkStore>,
}

impl Orchestrator {
    pub fn new(
        ebay_config: EbayConfig,
        poshmark_config: PoshmarkConfig,
        credentials: Arc<dyn CredentialStore>,
        links: Arc<dyn ListingLinkStore>,
        listings: Arc<dyn ListingStore>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let ebay_config = Arc::new(ebay_config);
        let poshmark_config = Arc::new(poshmark_config);

        let refresher = Arc::new(TokenRefresher::new(ebay_config.clone(), credentials.clone()));
        let gateway = Arc::new(RestApiGateway::new(ebay_config.clone(), refresher));
        let policies = Arc::new(PolicyResolver::new(ebay_config.clone(), gateway.clone()));
        let ebay = Arc::new(PublishPipeline::new(
            ebay_config,
            gateway,
            policies,
            links.clone(),
            listings,
        ));

        let sessions = Arc::new(BrowserSessionManager::new(
            poshmark_config.clone(),
            credentials,
        ));
        let poshmark = Arc::new(AutomationPublisher::new(
            poshmark_config.clone(),
            sessions.clone(),
            links.clone(),
            diagnostics.clone(),
        ));
        let scraper = Arc::new(InventoryScraper::new(
            poshmark_config,
            sessions.clone(),
            diagnostics,
        ));

        Self { ebay, poshmark, scraper, sessions, links }
    }

    /// Publish one listing to one marketplace. Terminal pipeline errors come
    /// back as a structured failure result, with the link row recording the
    /// failed attempt.
    pub async fn publish(&self, listing: &Listing, marketplace: Marketplace) -> PublishResult {
        let outcome = match marketplace.kind() {
            MarketplaceKind::Rest => self.ebay.publish(listing).await,
            MarketplaceKind::Browser => self.poshmark.publish(listing).await,
        };
        match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    target = "listbridge",
                    listing_id = listing.id,
                    marketplace = marketplace.as_str(),
                    error = %err,
                    remediation = ?err.remediation(),
                    "publish_failed"
                );
                self.record_failure(listing.id, marketplace).await;
                PublishResult::failed(err.to_string())
            }
        }
    }

    /// Create the inventory item and offer without publishing (REST
    /// marketplace only).
    pub async fn prepare_offer(
        &self,
        listing: &Listing,
    ) -> Result<RemoteListingLink, PublishError> {
        self.ebay.prepare_offer(listing).await
    }

    /// List the account's remote inventory items (REST marketplace only).
    pub async fn fetch_ebay_inventory(
        &self,
        user_id: i64,
    ) -> Result<Vec<InventoryItemSummary>, PublishError> {
        self.ebay.fetch_inventory(user_id).await
    }

    /// Remove a listing's inventory item from the REST marketplace, ending
    /// its link.
    pub async fn delete_ebay_inventory_item(
        &self,
        listing: &Listing,
    ) -> Result<(), PublishError> {
        self.ebay.delete_inventory_item(listing).await
    }

    /// Match remote inventory back to local listings by SKU.
    pub async fn sync_ebay_inventory(&self, user_id: i64) -> Result<SyncReport, PublishError> {
        self.ebay.sync_inventory(user_id).await
    }

    pub async fn scrape_inventory(&self, user_id: i64) -> Result<Vec<ScrapedItem>, PublishError> {
        self.scraper.scrape(user_id).await
    }

    /// Re-check a stored browser credential against the live site.
    pub async fn verify_browser_credential(&self, user_id: i64) -> Result<bool, PublishError> {
        self.sessions.verify_credential(user_id).await
    }

    async fn record_failure(&self, listing_id: i64, marketplace: Marketplace) {
        let mut link = match self.links.get_link(listing_id, marketplace).await {
            Ok(link) => link.unwrap_or_else(|| RemoteListingLink::new(listing_id, marketplace)),
            Err(err) => {
                warn!(target = "listbridge", error = %err, "failure_link_lookup_failed");
                return;
            }
        };
        link.status = LinkStatus::Failed;
        if let Err(err) = self.links.upsert_link(link).await {
            warn!(target = "listbridge", error = %err, "failure_link_record_failed");
        }
    }
}
