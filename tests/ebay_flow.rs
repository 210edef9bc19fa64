use chrono::{Duration, Utc};
use listbridge::ebay::{PolicyResolver, RestApiGateway, TokenRefresher};
use listbridge::{
    CredentialStore, EbayConfig, EbayEnvironment, InMemoryStore, LinkStatus, Listing,
    ListingLinkStore, Marketplace, MarketplaceCredential, NullDiagnosticSink, Orchestrator,
    PoshmarkConfig, PublishError, RemoteListingLink,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connected_credential(expires_in_secs: i64) -> MarketplaceCredential {
    MarketplaceCredential {
        access_token: Some("tok".into()),
        refresh_token: Some("refresh-tok".into()),
        expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
        ..Default::default()
    }
}

fn sandbox_config(server: &MockServer) -> EbayConfig {
    EbayConfig::new(EbayEnvironment::Sandbox, "client-id", "client-secret")
        .with_api_base(server.uri())
}

async fn seeded_store(expires_in_secs: i64) -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store
        .save_credential(1, Marketplace::Ebay, connected_credential(expires_in_secs))
        .await
        .expect("seed credential");
    store
}

fn orchestrator(config: EbayConfig, store: &Arc<InMemoryStore>) -> Orchestrator {
    Orchestrator::new(
        config,
        PoshmarkConfig::default(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(NullDiagnosticSink),
    )
}

fn vintage_jacket() -> Listing {
    Listing {
        id: 42,
        owner_id: 1,
        sku: None,
        title: Some("Vintage Jacket".into()),
        description: Some("Well-loved denim jacket".into()),
        price: Some(45.0),
        condition: Some("like new".into()),
        brand: Some("Levi's".into()),
        image_urls: vec!["https://cdn.example.com/jacket.jpg".into()],
    }
}

async fn mount_policy_lookups(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/sell/account/v1/fulfillment_policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fulfillmentPolicies": [
                {"fulfillmentPolicyId": "fp-1", "name": "Standard Shipping (USPSGroundAdvantage)"}
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sell/account/v1/payment_policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "paymentPolicies": [{"paymentPolicyId": "pp-1", "name": "Standard Payment"}]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sell/account/v1/return_policy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "returnPolicies": [{"returnPolicyId": "rp-1", "name": "30-Day Returns"}]
        })))
        .mount(server)
        .await;
}

async fn mount_merchant_location(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sell/inventory/v1/location/store_v3"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

/// Full pipeline with a forced duplicate-offer rejection on creation: the
/// surviving offer id must be recovered, updated in place, published, and
/// recorded on a single link row.
#[tokio::test]
async fn publish_recovers_conflicting_offer_and_records_link() {
    let server = MockServer::start().await;
    let store = seeded_store(3600).await;

    mount_merchant_location(&server).await;
    mount_policy_lookups(&server).await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/sell/inventory/v1/inventory_item/.+$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sell/inventory/v1/offer"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [{
                "errorId": 25002,
                "message": "Offer entity already exists.",
                "parameters": [{"name": "offerId", "value": "9213648010"}]
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sell/inventory/v1/offer/9213648010"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"offerId": "9213648010"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sell/inventory/v1/offer/9213648010/publish"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"listingId": "110586772"})))
        .mount(&server)
        .await;

    let app = orchestrator(sandbox_config(&server), &store);
    let result = app.publish(&vintage_jacket(), Marketplace::Ebay).await;

    assert!(result.success, "publish failed: {:?}", result.failure_reason);
    assert_eq!(result.external_id.as_deref(), Some("110586772"));
    assert_eq!(
        result.external_url.as_deref(),
        Some("https://sandbox.ebay.com/itm/110586772")
    );

    // Derived SKU was written back to the listing.
    assert_eq!(store.sku_of(42).await.as_deref(), Some("USER1-LISTING42"));

    let links = store.links().await;
    assert_eq!(links.len(), 1);
    let link = &links[0];
    assert_eq!(link.status, LinkStatus::Published);
    assert_eq!(link.offer_id.as_deref(), Some("9213648010"));
    assert_eq!(link.sku.as_deref(), Some("USER1-LISTING42"));
    assert!(link.external_url.as_deref().unwrap_or("").ends_with("/110586772"));
}

/// Publishing the same listing twice must not duplicate the link row: the
/// second attempt recovers the existing offer and updates in place.
#[tokio::test]
async fn double_publish_keeps_a_single_link_row() {
    let server = MockServer::start().await;
    let store = seeded_store(3600).await;

    mount_merchant_location(&server).await;
    mount_policy_lookups(&server).await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/sell/inventory/v1/inventory_item/.+$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    // First creation succeeds; every later one reports the duplicate.
    Mock::given(method("POST"))
        .and(path("/sell/inventory/v1/offer"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"offerId": "offer-7"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sell/inventory/v1/offer"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [{
                "message": "Offer entity already exists.",
                "parameters": [{"name": "offerId", "value": "offer-7"}]
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sell/inventory/v1/offer/offer-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"offerId": "offer-7"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sell/inventory/v1/offer/offer-7/publish"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"listingId": "555001"})))
        .expect(2)
        .mount(&server)
        .await;

    let app = orchestrator(sandbox_config(&server), &store);
    let listing = vintage_jacket();
    assert!(app.publish(&listing, Marketplace::Ebay).await.success);
    assert!(app.publish(&listing, Marketplace::Ebay).await.success);

    let links = store.links().await;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].status, LinkStatus::Published);
    assert_eq!(links[0].offer_id.as_deref(), Some("offer-7"));
}

/// A comfortably fresh token must be served from the store without any
/// network traffic at all.
#[tokio::test]
async fn fresh_token_is_served_without_network_calls() {
    let server = MockServer::start().await;
    let store = seeded_store(3600).await;
    let config = Arc::new(sandbox_config(&server));

    let refresher = TokenRefresher::new(config, store.clone());
    let token = refresher.access_token(1).await.expect("token");
    assert_eq!(token, "tok");
    assert!(server.received_requests().await.unwrap().is_empty());
}

/// An expired token triggers exactly one refresh, and the rotated token is
/// persisted so the next call stays off the network.
#[tokio::test]
async fn stale_token_refreshes_once_and_persists() {
    let server = MockServer::start().await;
    let store = seeded_store(-10).await;
    let config = Arc::new(sandbox_config(&server));

    Mock::given(method("POST"))
        .and(path("/identity/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "rotated-tok",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(config, store.clone());
    assert_eq!(refresher.access_token(1).await.expect("first"), "rotated-tok");
    assert_eq!(refresher.access_token(1).await.expect("second"), "rotated-tok");

    let saved = store
        .get_credential(1, Marketplace::Ebay)
        .await
        .expect("get")
        .expect("credential");
    assert_eq!(saved.access_token.as_deref(), Some("rotated-tok"));
    assert!(saved.expires_at.expect("expiry") > Utc::now() + Duration::seconds(3600));
}

/// Two concurrent callers racing a stale token must produce a single refresh
/// request between them.
#[tokio::test]
async fn concurrent_stale_callers_share_one_refresh() {
    let server = MockServer::start().await;
    let store = seeded_store(-10).await;
    let config = Arc::new(sandbox_config(&server));

    Mock::given(method("POST"))
        .and(path("/identity/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "rotated-tok",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = Arc::new(TokenRefresher::new(config, store.clone()));
    let (a, b) = tokio::join!(refresher.access_token(1), refresher.access_token(1));
    assert_eq!(a.expect("first caller"), "rotated-tok");
    assert_eq!(b.expect("second caller"), "rotated-tok");
}

/// A rejected refresh surfaces the marketplace's response body.
#[tokio::test]
async fn rejected_refresh_preserves_the_response_body() {
    let server = MockServer::start().await;
    let store = seeded_store(-10).await;
    let config = Arc::new(sandbox_config(&server));

    Mock::given(method("POST"))
        .and(path("/identity/v1/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(config, store);
    match refresher.access_token(1).await {
        Err(PublishError::RefreshFailed { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("expected RefreshFailed, got {other:?}"),
    }
}

/// With all three policy IDs supplied by the operator, resolution returns
/// them verbatim and never touches the network.
#[tokio::test]
async fn complete_policy_overrides_skip_the_network() {
    let server = MockServer::start().await;
    let store = seeded_store(3600).await;

    let mut config = sandbox_config(&server);
    config.policy_overrides.fulfillment_policy_id = Some("ov-f".into());
    config.policy_overrides.payment_policy_id = Some("ov-p".into());
    config.policy_overrides.return_policy_id = Some("ov-r".into());
    let config = Arc::new(config);

    let refresher = Arc::new(TokenRefresher::new(config.clone(), store.clone()));
    let gateway = Arc::new(RestApiGateway::new(config.clone(), refresher));
    let resolver = PolicyResolver::new(config, gateway);

    let set = resolver.resolve(1).await.expect("policy set");
    assert_eq!(set.fulfillment_policy_id, "ov-f");
    assert_eq!(set.payment_policy_id, "ov-p");
    assert_eq!(set.return_policy_id, "ov-r");
    assert_eq!(set.merchant_location_key, "store_v3");
    assert!(server.received_requests().await.unwrap().is_empty());
}

/// No account policies, and the policy-management program probe failing,
/// must surface as the missing-policies failure rather than a blind publish.
#[tokio::test]
async fn unresolvable_policies_fail_with_missing_policies() {
    let server = MockServer::start().await;
    let store = seeded_store(3600).await;
    let config = Arc::new(sandbox_config(&server));

    for policy_path in [
        "/sell/account/v1/fulfillment_policy",
        "/sell/account/v1/payment_policy",
        "/sell/account/v1/return_policy",
    ] {
        Mock::given(method("GET"))
            .and(path(policy_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/sell/account/v1/program/get_opted_in_programs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let refresher = Arc::new(TokenRefresher::new(config.clone(), store.clone()));
    let gateway = Arc::new(RestApiGateway::new(config.clone(), refresher));
    let resolver = PolicyResolver::new(config, gateway);

    match resolver.resolve(1).await {
        Err(PublishError::MissingPolicies) => {}
        other => panic!("expected MissingPolicies, got {other:?}"),
    }
}

/// The connect flow exchanges a callback code for a token pair and stores
/// the credential with a consistent expiry.
#[tokio::test]
async fn authorization_code_exchange_persists_the_credential() {
    let server = MockServer::start().await;
    let store = InMemoryStore::new();
    let config = Arc::new(sandbox_config(&server));

    Mock::given(method("POST"))
        .and(path("/identity/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-tok",
            "refresh_token": "long-lived-tok",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(config, store.clone());
    refresher
        .connect(1, "auth-code-abc", "https://app.example.com/callback")
        .await
        .expect("exchange");

    let saved = store
        .get_credential(1, Marketplace::Ebay)
        .await
        .expect("get")
        .expect("credential");
    assert_eq!(saved.access_token.as_deref(), Some("fresh-tok"));
    assert_eq!(saved.refresh_token.as_deref(), Some("long-lived-tok"));
    assert!(saved.expires_at.expect("expiry") > Utc::now());
}

/// A rejected code exchange surfaces as a connect failure carrying the
/// marketplace's response, and nothing is persisted.
#[tokio::test]
async fn rejected_code_exchange_surfaces_connect_failure() {
    let server = MockServer::start().await;
    let store = InMemoryStore::new();
    let config = Arc::new(sandbox_config(&server));

    Mock::given(method("POST"))
        .and(path("/identity/v1/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .mount(&server)
        .await;

    let refresher = TokenRefresher::new(config, store.clone());
    match refresher
        .connect(1, "stale-code", "https://app.example.com/callback")
        .await
    {
        Err(PublishError::ConnectFailed { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    assert!(store.get_credential(1, Marketplace::Ebay).await.expect("get").is_none());
}

/// The remote inventory listing comes back as parsed summaries.
#[tokio::test]
async fn inventory_fetch_lists_remote_items() {
    let server = MockServer::start().await;
    let store = seeded_store(3600).await;

    Mock::given(method("GET"))
        .and(path("/sell/inventory/v1/inventory_item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "inventoryItems": [
                {
                    "sku": "USER1-LISTING42",
                    "product": {"title": "Vintage Jacket"},
                    "availability": {"shipToLocationAvailability": {"quantity": 1}}
                },
                {"sku": "OTHER-9", "product": {"title": "Enamel Mug"}}
            ],
            "total": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = orchestrator(sandbox_config(&server), &store);
    let items = app.fetch_ebay_inventory(1).await.expect("inventory");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].sku, "USER1-LISTING42");
    assert_eq!(items[0].title.as_deref(), Some("Vintage Jacket"));
    assert_eq!(items[0].quantity, Some(1));
    assert_eq!(items[1].sku, "OTHER-9");
}

/// Deleting an inventory item removes it remotely and ends the local link.
#[tokio::test]
async fn deleting_an_inventory_item_ends_the_link() {
    let server = MockServer::start().await;
    let store = seeded_store(3600).await;

    let mut link = RemoteListingLink::new(42, Marketplace::Ebay);
    link.status = LinkStatus::Published;
    link.sku = Some("USER1-LISTING42".into());
    store.upsert_link(link).await.expect("seed link");

    Mock::given(method("DELETE"))
        .and(path("/sell/inventory/v1/inventory_item/USER1-LISTING42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let app = orchestrator(sandbox_config(&server), &store);
    app.delete_ebay_inventory_item(&vintage_jacket()).await.expect("delete");

    let links = store.links().await;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].status, LinkStatus::Ended);
}

/// Sync matches remote items to local listings by SKU and records an
/// offer_created link for each, leaving published links alone.
#[tokio::test]
async fn sync_marks_matched_listings_offer_created() {
    let server = MockServer::start().await;
    let store = seeded_store(3600).await;
    store
        .add_listing(Listing {
            id: 42,
            owner_id: 1,
            sku: Some("USER1-LISTING42".into()),
            ..Default::default()
        })
        .await;

    Mock::given(method("GET"))
        .and(path("/sell/inventory/v1/inventory_item"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "inventoryItems": [
                {"sku": "USER1-LISTING42", "product": {"title": "Vintage Jacket"}},
                {"sku": "NOBODY-LOCAL", "product": {"title": "Unknown"}}
            ],
            "total": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = orchestrator(sandbox_config(&server), &store);
    let report = app.sync_ebay_inventory(1).await.expect("sync");
    assert_eq!(report.remote_items, 2);
    assert_eq!(report.matched, 1);

    let links = store.links().await;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].listing_id, 42);
    assert_eq!(links[0].status, LinkStatus::OfferCreated);
    assert_eq!(links[0].sku.as_deref(), Some("USER1-LISTING42"));
}

/// An account with no stored credential fails before any network traffic.
#[tokio::test]
async fn unconnected_account_fails_fast() {
    let server = MockServer::start().await;
    let store = InMemoryStore::new();
    let config = Arc::new(sandbox_config(&server));

    let refresher = TokenRefresher::new(config, store);
    match refresher.access_token(99).await {
        Err(PublishError::NotConnected) => {}
        other => panic!("expected NotConnected, got {other:?}"),
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}
