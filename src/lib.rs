//! Marketplace publish orchestrator: projects locally stored listings onto
//! external marketplaces (eBay through its REST Sell APIs, Poshmark through
//! an authenticated browser session) with idempotent retries and a typed
//! failure taxonomy.
//!
//! The surrounding web application (routing, persistence, file storage) is an
//! external collaborator; it talks to this crate through the traits in
//! [`store`] and the [`orchestrator::Orchestrator`] facade.

pub mod config;
pub mod diagnostics;
pub mod ebay;
pub mod error;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod poshmark;
pub mod store;
pub mod telemetry;

pub use config::{EbayConfig, EbayEnvironment, PoshmarkConfig};
pub use diagnostics::{DiagnosticSink, FsDiagnosticSink, NullDiagnosticSink};
pub use error::{PublishError, Remediation};
pub use http::HttpTimeouts;
pub use models::{
    Listing, LinkStatus, Marketplace, MarketplaceCredential, MarketplaceKind, PolicySet,
    PublishResult, RemoteListingLink, ScrapedItem, StoredCookie,
};
pub use orchestrator::Orchestrator;
pub use store::{CredentialStore, InMemoryStore, ListingLinkStore, ListingStore, StoreError};
