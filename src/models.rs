use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marketplaces this orchestrator can project a listing onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    Ebay,
    Poshmark,
}

/// How a marketplace is reached: a documented REST API or an authenticated
/// browser session driven against the rendered site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketplaceKind {
    Rest,
    Browser,
}

impl Marketplace {
    pub fn kind(&self) -> MarketplaceKind {
        match self {
            Marketplace::Ebay => MarketplaceKind::Rest,
            Marketplace::Poshmark => MarketplaceKind::Browser,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Ebay => "ebay",
            Marketplace::Poshmark => "poshmark",
        }
    }
}

/// Per-user credential for one marketplace. Owned by exactly one
/// user×marketplace pair; mutated only by the refresh/connect flows and
/// destroyed on explicit disconnect.
///
/// For the REST marketplace `expires_at` always describes the currently
/// stored `access_token`; the two are persisted together, never updated
/// independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketplaceCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<StoredCookie>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// One browser cookie as captured from a prior login. Mirrors the shape of a
/// browser cookie export: `expires_at` is epoch seconds and is also accepted
/// under the export's `expirationDate` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    #[serde(default, alias = "sameSite", skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
    #[serde(default, alias = "expirationDate", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
}

/// Remote-side state of one (listing, marketplace) pair. Looked up by that
/// key before insert and updated in place on every publish attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteListingLink {
    pub listing_id: i64,
    pub marketplace: Marketplace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub status: LinkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

impl RemoteListingLink {
    pub fn new(listing_id: i64, marketplace: Marketplace) -> Self {
        Self {
            listing_id,
            marketplace,
            external_id: None,
            offer_id: None,
            sku: None,
            status: LinkStatus::Draft,
            external_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Draft,
    OfferCreated,
    Published,
    Failed,
    Ended,
}

/// Resolved seller configuration required before an offer can be published.
/// Re-resolved per publish call; idempotent against remote account state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySet {
    pub fulfillment_policy_id: String,
    pub payment_policy_id: String,
    pub return_policy_id: String,
    pub merchant_location_key: String,
}

/// Structured outcome handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl PublishResult {
    pub fn published(external_id: Option<String>, external_url: Option<String>) -> Self {
        Self {
            success: true,
            external_id,
            external_url,
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            external_id: None,
            external_url: None,
            failure_reason: Some(reason.into()),
        }
    }
}

/// The locally stored listing, as handed in by the embedding application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub owner_id: i64,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

/// One item extracted from the browser marketplace's rendered closet view.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapedItem {
    pub sku: String,
    pub title: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub external_url: String,
}
