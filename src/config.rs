use crate::http::HttpTimeouts;
use std::env;
use std::time::Duration;

/// Which eBay environment this process talks to. Selected once at
/// construction; every derived URL follows from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EbayEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl EbayEnvironment {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" | "live" => Self::Production,
            _ => Self::Sandbox,
        }
    }

    pub fn api_base(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://api.sandbox.ebay.com",
            Self::Production => "https://api.ebay.com",
        }
    }

    /// Public item-page base used to build the externally visible URL of a
    /// published listing.
    pub fn item_url_base(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.ebay.com/itm",
            Self::Production => "https://www.ebay.com/itm",
        }
    }

    pub fn authorize_base(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://auth.sandbox.ebay.com/oauth2/authorize",
            Self::Production => "https://auth.ebay.com/oauth2/authorize",
        }
    }
}

/// OAuth scopes requested during the connect flow.
pub const EBAY_SCOPES: [&str; 5] = [
    "https://api.ebay.com/oauth/api_scope",
    "https://api.ebay.com/oauth/api_scope/sell.account.readonly",
    "https://api.ebay.com/oauth/api_scope/sell.account",
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
    "https://api.ebay.com/oauth/api_scope/sell.fulfillment",
];

/// Operator-supplied policy IDs. When all three are present the resolver
/// returns them verbatim without touching the network.
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub fulfillment_policy_id: Option<String>,
    pub payment_policy_id: Option<String>,
    pub return_policy_id: Option<String>,
}

impl PolicyOverrides {
    pub fn complete(&self) -> Option<(String, String, String)> {
        Some((
            self.fulfillment_policy_id.clone()?,
            self.payment_policy_id.clone()?,
            self.return_policy_id.clone()?,
        ))
    }
}

/// Seller shipping-origin record pushed to the marketplace when absent.
#[derive(Debug, Clone)]
pub struct MerchantLocation {
    pub key: String,
    pub name: String,
    pub address_line1: String,
    pub city: String,
    pub state_or_province: String,
    pub postal_code: String,
    pub country: String,
}

impl Default for MerchantLocation {
    fn default() -> Self {
        Self {
            key: "store_v3".into(),
            name: "Main Store".into(),
            address_line1: "2055 Hamilton Ave".into(),
            city: "San Jose".into(),
            state_or_province: "CA".into(),
            postal_code: "95125".into(),
            country: "US".into(),
        }
    }
}

/// Everything the REST-marketplace components need, constructed explicitly
/// and passed in; no process-wide settings object.
#[derive(Debug, Clone)]
pub struct EbayConfig {
    pub environment: EbayEnvironment,
    /// Derived from `environment`; overridable so tests can point the whole
    /// stack at a local simulator.
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub marketplace_id: String,
    pub default_category_id: String,
    pub item_location_country: String,
    pub item_location_postal_code: String,
    pub policy_overrides: PolicyOverrides,
    pub merchant_location: MerchantLocation,
    pub http_timeouts: HttpTimeouts,
}

impl EbayConfig {
    pub fn new(
        environment: EbayEnvironment,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            api_base: environment.api_base().to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            marketplace_id: "EBAY_US".into(),
            default_category_id: "11450".into(),
            item_location_country: "US".into(),
            item_location_postal_code: "95112".into(),
            policy_overrides: PolicyOverrides::default(),
            merchant_location: MerchantLocation::default(),
            http_timeouts: HttpTimeouts::default(),
        }
    }

    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let environment = EbayEnvironment::parse(
            &env::var("EBAY_ENVIRONMENT").unwrap_or_else(|_| "sandbox".into()),
        );
        let mut config = Self::new(
            environment,
            env::var("EBAY_CLIENT_ID").unwrap_or_default(),
            env::var("EBAY_CLIENT_SECRET").unwrap_or_default(),
        );
        config.policy_overrides = PolicyOverrides {
            fulfillment_policy_id: non_empty_env("EBAY_FULFILLMENT_POLICY_ID"),
            payment_policy_id: non_empty_env("EBAY_PAYMENT_POLICY_ID"),
            return_policy_id: non_empty_env("EBAY_RETURN_POLICY_ID"),
        };
        if let Some(key) = non_empty_env("EBAY_MERCHANT_LOCATION_KEY") {
            config.merchant_location.key = key;
        }
        config.http_timeouts = HttpTimeouts::from_env();
        config
    }

    /// Point the gateway at an arbitrary base URL. Test hook.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.api_base)
    }

    pub fn item_url(&self, listing_id: &str) -> String {
        format!("{}/{listing_id}", self.environment.item_url_base())
    }

    /// Consent-page URL the user is sent to during the connect flow. `state`
    /// round-trips through the marketplace so the callback can identify the
    /// connecting account.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.environment.authorize_base(),
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&EBAY_SCOPES.join(" ")),
            urlencoding::encode(state),
        )
    }
}

/// Browser-marketplace settings. Every network-bound automation step runs
/// under one of these bounded timeouts.
#[derive(Debug, Clone)]
pub struct PoshmarkConfig {
    pub base_url: String,
    pub headless: bool,
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
    pub settle_delay: Duration,
    pub login_timeout: Duration,
    pub max_images: usize,
    pub image_download_concurrency: usize,
    pub user_agent: String,
    pub http_timeouts: HttpTimeouts,
}

impl Default for PoshmarkConfig {
    fn default() -> Self {
        Self {
            base_url: "https://poshmark.com".into(),
            headless: true,
            navigation_timeout: Duration::from_secs(30),
            selector_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(3),
            login_timeout: Duration::from_secs(30),
            max_images: 8,
            image_download_concurrency: 4,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .into(),
            http_timeouts: HttpTimeouts::default(),
        }
    }
}

impl PoshmarkConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        if let Ok(raw) = env::var("POSHMARK_HEADLESS") {
            config.headless = matches!(raw.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(secs) = env::var("POSHMARK_NAV_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.navigation_timeout = Duration::from_secs(secs);
        }
        config.http_timeouts = HttpTimeouts::from_env();
        config
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    pub fn feed_url(&self) -> String {
        format!("{}/feed", self.base_url)
    }

    pub fn new_listing_url(&self) -> String {
        format!("{}/listing/new", self.base_url)
    }

    pub fn closet_url(&self, username: &str) -> String {
        format!("{}/closet/{username}", self.base_url)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
