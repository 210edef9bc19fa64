use crate::config::EbayConfig;
use crate::ebay::gateway::{ApiResponse, RestApiGateway};
use crate::ebay::policies::PolicyResolver;
use crate::error::PublishError;
use crate::models::{LinkStatus, Listing, Marketplace, PolicySet, PublishResult, RemoteListingLink};
use crate::store::{ListingLinkStore, ListingStore};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

const MAX_IMAGE_URLS: usize = 12;
const QUANTITY: u32 = 1;
const INVENTORY_PAGE_SIZE: u32 = 100;
const SYNC_PAGE_SIZE: u32 = 200;

/// One remote inventory item as listed by the marketplace.
#[derive(Debug, Clone)]
pub struct InventoryItemSummary {
    pub sku: String,
    pub title: Option<String>,
    pub quantity: Option<u32>,
}

/// Outcome of an inventory sync: how many items the marketplace reported and
/// how many matched a local listing.
#[derive(Debug, Clone, Copy)]
pub struct SyncReport {
    pub remote_items: usize,
    pub matched: usize,
}

/// Inventory-item → offer → publish, in that order, against the REST
/// marketplace. Each stage is idempotent against remote state: re-publishing
/// an existing SKU updates the item in place and recovers the already-created
/// offer from the duplicate error the marketplace returns.
pub struct PublishPipeline {
    config: Arc<EbayConfig>,
    gateway: Arc<RestApiGateway>,
    policies: Arc<PolicyResolver>,
    links: Arc<dyn ListingLinkStore>,
    listings: Arc<dyn ListingStore>,
}

enum OfferOutcome {
    Created(String),
    Conflict(String),
    Failed(ApiResponse),
}

impl PublishPipeline {
    pub fn new(
        config: Arc<EbayConfig>,
        gateway: Arc<RestApiGateway>,
        policies: Arc<PolicyResolver>,
        links: Arc<dyn ListingLinkStore>,
        listings: Arc<dyn ListingStore>,
    ) -> Self {
        Self { config, gateway, policies, links, listings }
    }

    /// Run the full pipeline and record the resulting link as Published.
    pub async fn publish(&self, listing: &Listing) -> Result<PublishResult, PublishError> {
        let sku = self.settle_sku(listing).await?;
        let offer_id = self.upsert_inventory_and_offer(listing, &sku, true).await?;

        let publish_response = self
            .gateway
            .post(
                listing.owner_id,
                &format!("/sell/inventory/v1/offer/{offer_id}/publish"),
                Some(&json!({})),
            )
            .await?;
        if !publish_response.is_success() {
            return Err(PublishError::PublishFailed {
                status: publish_response.status,
                body: publish_response.body,
            });
        }
        let external_id = publish_response
            .json()
            .and_then(|body| body.get("listingId").and_then(Value::as_str).map(String::from));
        let external_url = external_id.as_deref().map(|id| self.config.item_url(id));

        let mut link = self.load_link(listing.id).await?;
        link.status = LinkStatus::Published;
        link.sku = Some(sku);
        link.offer_id = Some(offer_id);
        link.external_id = external_id.clone();
        link.external_url = external_url.clone();
        self.links.upsert_link(link).await?;

        info!(
            target = "listbridge.ebay",
            listing_id = listing.id,
            external_id = external_id.as_deref().unwrap_or(""),
            "listing_published"
        );
        Ok(PublishResult::published(external_id, external_url))
    }

    /// Create the inventory item and offer without publishing, for sellers
    /// who finish the draft on the marketplace itself. The link stops at
    /// OfferCreated.
    pub async fn prepare_offer(&self, listing: &Listing) -> Result<RemoteListingLink, PublishError> {
        let sku = self.settle_sku(listing).await?;
        let offer_id = self.upsert_inventory_and_offer(listing, &sku, false).await?;

        let mut link = self.load_link(listing.id).await?;
        link.status = LinkStatus::OfferCreated;
        link.sku = Some(sku);
        link.offer_id = Some(offer_id);
        self.links.upsert_link(link.clone()).await?;
        Ok(link)
    }

    /// List the account's remote inventory items.
    pub async fn fetch_inventory(
        &self,
        user_id: i64,
    ) -> Result<Vec<InventoryItemSummary>, PublishError> {
        let response = self.list_inventory(user_id, INVENTORY_PAGE_SIZE).await?;
        Ok(inventory_summaries(&response))
    }

    /// Remove the listing's inventory item from the marketplace and mark any
    /// existing link as Ended.
    pub async fn delete_inventory_item(&self, listing: &Listing) -> Result<(), PublishError> {
        let sku = derive_sku(listing);
        let response = self
            .gateway
            .delete(
                listing.owner_id,
                &format!("/sell/inventory/v1/inventory_item/{}", urlencoding::encode(&sku)),
            )
            .await?;
        if !response.is_success() {
            return Err(PublishError::InventoryDeleteFailed {
                status: response.status,
                body: response.body,
            });
        }

        if let Some(mut link) = self.links.get_link(listing.id, Marketplace::Ebay).await? {
            link.status = LinkStatus::Ended;
            self.links.upsert_link(link).await?;
        }
        info!(target = "listbridge.ebay", listing_id = listing.id, sku, "inventory_item_deleted");
        Ok(())
    }

    /// Match the marketplace's inventory back to local listings by SKU.
    /// A matched listing gains an OfferCreated link unless it is already
    /// Published.
    pub async fn sync_inventory(&self, user_id: i64) -> Result<SyncReport, PublishError> {
        let response = self.list_inventory(user_id, SYNC_PAGE_SIZE).await?;
        let items = inventory_summaries(&response);

        let mut matched = 0;
        for item in &items {
            let Some(listing) = self.listings.find_listing_by_sku(user_id, &item.sku).await?
            else {
                continue;
            };
            let mut link = self.load_link(listing.id).await?;
            if link.status != LinkStatus::Published {
                link.status = LinkStatus::OfferCreated;
            }
            link.sku = Some(item.sku.clone());
            self.links.upsert_link(link).await?;
            matched += 1;
        }

        info!(
            target = "listbridge.ebay",
            user_id,
            remote_items = items.len(),
            matched,
            "inventory_synced"
        );
        Ok(SyncReport { remote_items: items.len(), matched })
    }

    async fn list_inventory(&self, user_id: i64, limit: u32) -> Result<ApiResponse, PublishError> {
        let limit = limit.to_string();
        let response = self
            .gateway
            .get(
                user_id,
                "/sell/inventory/v1/inventory_item",
                &[("limit", limit.as_str()), ("offset", "0")],
            )
            .await?;
        if !response.is_success() {
            return Err(PublishError::InventoryQueryFailed {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }

    /// Sanitize (or derive) the SKU and write it back so the stored listing
    /// reflects what the marketplace will see even if a later stage fails.
    async fn settle_sku(&self, listing: &Listing) -> Result<String, PublishError> {
        let sku = derive_sku(listing);
        if listing.sku.as_deref() != Some(sku.as_str()) {
            self.listings.persist_sku(listing.id, &sku).await?;
        }
        Ok(sku)
    }

    async fn upsert_inventory_and_offer(
        &self,
        listing: &Listing,
        sku: &str,
        map_listing_condition: bool,
    ) -> Result<String, PublishError> {
        let user_id = listing.owner_id;
        let merchant_location_key = self.policies.ensure_merchant_location(user_id).await?;
        let mut policy_set = self.policies.resolve(user_id).await?;
        policy_set.merchant_location_key = merchant_location_key;

        let condition = if map_listing_condition {
            map_condition(listing.condition.as_deref())
        } else {
            "NEW"
        };
        let inventory_payload = inventory_item_payload(listing, sku, condition);
        let inventory_response = self
            .gateway
            .put(
                user_id,
                &format!("/sell/inventory/v1/inventory_item/{}", urlencoding::encode(sku)),
                Some(&inventory_payload),
            )
            .await?;
        if !inventory_response.is_success() {
            return Err(PublishError::InventoryCreateFailed {
                status: inventory_response.status,
                body: inventory_response.body,
            });
        }

        let offer_payload = offer_payload(&self.config, listing, sku, &policy_set);
        let offer_id = match self.create_offer(user_id, &offer_payload).await? {
            OfferOutcome::Created(id) => id,
            OfferOutcome::Conflict(id) => {
                // The offer survives from an earlier attempt; refresh it so
                // price and description changes take effect.
                let update = self
                    .gateway
                    .put(
                        user_id,
                        &format!("/sell/inventory/v1/offer/{id}"),
                        Some(&offer_payload),
                    )
                    .await?;
                if !update.is_success() {
                    return Err(PublishError::OfferCreateFailed {
                        status: update.status,
                        body: update.body,
                    });
                }
                id
            }
            OfferOutcome::Failed(response) => {
                return Err(PublishError::OfferCreateFailed {
                    status: response.status,
                    body: response.body,
                });
            }
        };
        Ok(offer_id)
    }

    async fn create_offer(
        &self,
        user_id: i64,
        payload: &Value,
    ) -> Result<OfferOutcome, PublishError> {
        let response = self
            .gateway
            .post(user_id, "/sell/inventory/v1/offer", Some(payload))
            .await?;
        if response.is_success() {
            if let Some(id) = response
                .json()
                .and_then(|body| body.get("offerId").and_then(Value::as_str).map(String::from))
            {
                return Ok(OfferOutcome::Created(id));
            }
            return Ok(OfferOutcome::Failed(response));
        }
        match extract_conflicting_offer_id(&response) {
            Some(id) => Ok(OfferOutcome::Conflict(id)),
            None => Ok(OfferOutcome::Failed(response)),
        }
    }

    async fn load_link(&self, listing_id: i64) -> Result<RemoteListingLink, PublishError> {
        Ok(self
            .links
            .get_link(listing_id, Marketplace::Ebay)
            .await?
            .unwrap_or_else(|| RemoteListingLink::new(listing_id, Marketplace::Ebay)))
    }
}

/// Collapse anything outside `[a-zA-Z0-9_/-]` to `-`, squeeze runs of `-`,
/// then trim leading/trailing `-` and `_`. Idempotent; never empty.
pub fn sanitize_sku(raw: &str) -> String {
    let mut sanitized = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for c in raw.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '-') {
            c
        } else {
            '-'
        };
        if mapped == '-' {
            if !last_was_dash {
                sanitized.push('-');
            }
            last_was_dash = true;
        } else {
            sanitized.push(mapped);
            last_was_dash = false;
        }
    }
    let trimmed = sanitized.trim_matches(|c| c == '-' || c == '_');
    if trimmed.is_empty() {
        "SKU".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Use the listing's own SKU when present, otherwise a deterministic
/// `USER{owner}-LISTING{id}` so retries target the same inventory item.
pub fn derive_sku(listing: &Listing) -> String {
    match listing.sku.as_deref().map(str::trim) {
        Some(sku) if !sku.is_empty() => sanitize_sku(sku),
        _ => sanitize_sku(&format!("USER{}-LISTING{}", listing.owner_id, listing.id)),
    }
}

/// Map a free-text condition onto the marketplace's enum. Keywords are
/// checked in precedence order: "new" wins over "like", so "like new" maps
/// to NEW.
pub fn map_condition(condition: Option<&str>) -> &'static str {
    let Some(condition) = condition else {
        return "NEW";
    };
    let c = condition.to_lowercase();
    if c.contains("new") {
        "NEW"
    } else if c.contains("like") {
        "LIKE_NEW"
    } else if c.contains("good") || c.contains("used") {
        "USED_GOOD"
    } else if c.contains("parts") {
        "FOR_PARTS_OR_NOT_WORKING"
    } else {
        "NEW"
    }
}

/// Keep only absolute URLs the marketplace can fetch, capped at the image
/// limit. Loopback hosts are dropped since the remote side cannot reach them.
pub fn publishable_image_urls(urls: &[String]) -> Vec<String> {
    urls.iter()
        .filter(|url| {
            url.starts_with("http") && !url.contains("127.0.0.1") && !url.contains("localhost")
        })
        .take(MAX_IMAGE_URLS)
        .cloned()
        .collect()
}

/// A duplicate-offer rejection carries the surviving offer's id in the first
/// error parameter.
pub fn extract_conflicting_offer_id(response: &ApiResponse) -> Option<String> {
    let body = response.json()?;
    let errors = body.get("errors")?.as_array()?.clone();
    for error in &errors {
        let message = error.get("message").and_then(Value::as_str).unwrap_or("");
        if message.to_lowercase().contains("offer entity already exists") {
            return error
                .get("parameters")
                .and_then(Value::as_array)
                .and_then(|params| params.first())
                .and_then(|param| param.get("value").and_then(Value::as_str))
                .map(String::from);
        }
    }
    None
}

/// Flatten the inventory-item list response; entries without a SKU are
/// useless for matching and are dropped.
pub(crate) fn inventory_summaries(response: &ApiResponse) -> Vec<InventoryItemSummary> {
    let Some(body) = response.json() else {
        return Vec::new();
    };
    body.get("inventoryItems")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let sku = item.get("sku").and_then(Value::as_str)?;
                    Some(InventoryItemSummary {
                        sku: sku.to_string(),
                        title: item
                            .get("product")
                            .and_then(|p| p.get("title"))
                            .and_then(Value::as_str)
                            .map(String::from),
                        quantity: item
                            .get("availability")
                            .and_then(|a| a.get("shipToLocationAvailability"))
                            .and_then(|s| s.get("quantity"))
                            .and_then(Value::as_u64)
                            .map(|q| q as u32),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn inventory_item_payload(listing: &Listing, sku: &str, condition: &str) -> Value {
    let mut product = json!({
        "title": listing.title.as_deref().unwrap_or("Untitled"),
        "description": listing.description.as_deref().unwrap_or("No description"),
    });
    let image_urls = publishable_image_urls(&listing.image_urls);
    if !image_urls.is_empty() {
        product["imageUrls"] = json!(image_urls);
    }
    json!({
        "sku": sku,
        "locale": "en_US",
        "product": product,
        "condition": condition,
        "availability": {"shipToLocationAvailability": {"quantity": QUANTITY}}
    })
}

fn offer_payload(config: &EbayConfig, listing: &Listing, sku: &str, policies: &PolicySet) -> Value {
    let price = listing.price.unwrap_or(0.0);
    json!({
        "sku": sku,
        "marketplaceId": config.marketplace_id,
        "format": "FIXED_PRICE",
        "availableQuantity": QUANTITY,
        "categoryId": config.default_category_id,
        "listingDescription": listing.description.as_deref().unwrap_or("No description"),
        "merchantLocationKey": policies.merchant_location_key,
        "itemLocation": {
            "country": config.item_location_country,
            "postalCode": config.item_location_postal_code
        },
        "listingPolicies": {
            "fulfillmentPolicyId": policies.fulfillment_policy_id,
            "paymentPolicyId": policies.payment_policy_id,
            "returnPolicyId": policies.return_policy_id
        },
        "listingDuration": "GTC",
        "pricingSummary": {"price": {"currency": "USD", "value": format!("{price:.2}")}}
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sku_sanitization_collapses_and_trims() {
        assert_eq!(sanitize_sku("My Cool Item!!"), "My-Cool-Item");
        assert_eq!(sanitize_sku("a  b--c"), "a-b-c");
        assert_eq!(sanitize_sku("ABC_123/X"), "ABC_123/X");
    }

    #[test]
    fn sku_sanitization_is_idempotent() {
        for raw in ["My Cool Item!!", "--_weird__--", "###", "ok-sku"] {
            let once = sanitize_sku(raw);
            assert_eq!(sanitize_sku(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn unusable_sku_falls_back_to_placeholder() {
        assert_eq!(sanitize_sku("!!!"), "SKU");
        assert_eq!(sanitize_sku(""), "SKU");
    }

    #[test]
    fn missing_sku_derives_a_deterministic_one() {
        let listing = Listing { id: 42, owner_id: 7, ..Default::default() };
        assert_eq!(derive_sku(&listing), "USER7-LISTING42");
    }

    #[test]
    fn condition_mapping_follows_keyword_precedence() {
        // "new" takes precedence, so "like new" is NEW rather than LIKE_NEW.
        assert_eq!(map_condition(Some("Like New")), "NEW");
        assert_eq!(map_condition(Some("Brand New")), "NEW");
        assert_eq!(map_condition(Some("looks like it was worn once")), "LIKE_NEW");
        assert_eq!(map_condition(Some("used, good shape")), "USED_GOOD");
        assert_eq!(map_condition(Some("for parts")), "FOR_PARTS_OR_NOT_WORKING");
        assert_eq!(map_condition(Some("mint")), "NEW");
        assert_eq!(map_condition(None), "NEW");
    }

    #[test]
    fn image_urls_filtered_and_capped() {
        let mut urls: Vec<String> = (0..15)
            .map(|i| format!("https://cdn.example.com/{i}.jpg"))
            .collect();
        urls.insert(0, "http://127.0.0.1/local.jpg".into());
        urls.insert(1, "file:///etc/passwd".into());
        urls.insert(2, "http://localhost:8000/x.jpg".into());
        let kept = publishable_image_urls(&urls);
        assert_eq!(kept.len(), 12);
        assert!(kept.iter().all(|u| u.starts_with("https://cdn.example.com/")));
    }

    #[test]
    fn conflicting_offer_id_extracted_from_error_parameters() {
        let response = ApiResponse {
            status: 400,
            body: r#"{"errors":[{
                "errorId": 25002,
                "message": "Offer entity already exists.",
                "parameters": [{"name": "offerId", "value": "9213648010"}]
            }]}"#
                .into(),
        };
        assert_eq!(
            extract_conflicting_offer_id(&response).as_deref(),
            Some("9213648010")
        );
    }

    #[test]
    fn unrelated_offer_error_yields_no_conflict() {
        let response = ApiResponse {
            status: 400,
            body: r#"{"errors":[{"message":"Invalid categoryId","parameters":[{"value":"x"}]}]}"#
                .into(),
        };
        assert!(extract_conflicting_offer_id(&response).is_none());
    }

    #[test]
    fn inventory_list_parsing_drops_skuless_entries() {
        let response = ApiResponse {
            status: 200,
            body: r#"{"inventoryItems":[
                {"sku":"USER1-LISTING42",
                 "product":{"title":"Vintage Jacket"},
                 "availability":{"shipToLocationAvailability":{"quantity":1}}},
                {"product":{"title":"No SKU"}},
                {"sku":"BARE-1"}
            ],"total":3}"#
                .into(),
        };
        let items = inventory_summaries(&response);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].sku, "USER1-LISTING42");
        assert_eq!(items[0].title.as_deref(), Some("Vintage Jacket"));
        assert_eq!(items[0].quantity, Some(1));
        assert_eq!(items[1].sku, "BARE-1");
        assert!(items[1].title.is_none());
    }

    #[test]
    fn inventory_list_parsing_tolerates_odd_bodies() {
        let empty = ApiResponse { status: 200, body: "{}".into() };
        assert!(inventory_summaries(&empty).is_empty());
        let junk = ApiResponse { status: 200, body: "<html>".into() };
        assert!(inventory_summaries(&junk).is_empty());
    }

    #[test]
    fn offer_payload_formats_price_to_cents() {
        let config = EbayConfig::new(crate::config::EbayEnvironment::Sandbox, "id", "secret");
        let listing = Listing { id: 1, owner_id: 1, price: Some(19.5), ..Default::default() };
        let policies = PolicySet {
            fulfillment_policy_id: "f".into(),
            payment_policy_id: "p".into(),
            return_policy_id: "r".into(),
            merchant_location_key: "store_v3".into(),
        };
        let payload = offer_payload(&config, &listing, "SKU-1", &policies);
        assert_eq!(payload["pricingSummary"]["price"]["value"], "19.50");
        assert_eq!(payload["listingDuration"], "GTC");
        assert_eq!(payload["format"], "FIXED_PRICE");
        assert_eq!(payload["listingPolicies"]["fulfillmentPolicyId"], "f");
    }
}
