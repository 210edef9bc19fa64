use crate::config::EbayConfig;
use crate::ebay::gateway::{ApiResponse, RestApiGateway};
use crate::error::PublishError;
use crate::models::PolicySet;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

const SHIPPING_SERVICES: [&str; 3] = ["USPSGroundAdvantage", "USPSFirstClass", "USPSPriorityMail"];

/// One of the three seller-policy categories, with the JSON keys the account
/// API uses for its list and id fields.
struct PolicyCategory {
    path: &'static str,
    list_key: &'static str,
    id_key: &'static str,
}

const FULFILLMENT: PolicyCategory = PolicyCategory {
    path: "/sell/account/v1/fulfillment_policy",
    list_key: "fulfillmentPolicies",
    id_key: "fulfillmentPolicyId",
};
const PAYMENT: PolicyCategory = PolicyCategory {
    path: "/sell/account/v1/payment_policy",
    list_key: "paymentPolicies",
    id_key: "paymentPolicyId",
};
const RETURN: PolicyCategory = PolicyCategory {
    path: "/sell/account/v1/return_policy",
    list_key: "returnPolicies",
    id_key: "returnPolicyId",
};

/// Resolves the seller policy set an offer needs before it can publish.
///
/// Resolution order: operator overrides (all three present short-circuits
/// with zero network calls), then existing account policies, then program
/// opt-in plus default-policy creation as a last resort.
pub struct PolicyResolver {
    config: Arc<EbayConfig>,
    gateway: Arc<RestApiGateway>,
}

impl PolicyResolver {
    pub fn new(config: Arc<EbayConfig>, gateway: Arc<RestApiGateway>) -> Self {
        Self { config, gateway }
    }

    pub async fn resolve(&self, user_id: i64) -> Result<PolicySet, PublishError> {
        if let Some((fulfillment, payment, ret)) = self.config.policy_overrides.complete() {
            return Ok(self.policy_set(fulfillment, payment, ret));
        }

        let overrides = &self.config.policy_overrides;
        let mut fulfillment = self.lookup_policy_id(user_id, &FULFILLMENT).await?;
        let mut payment = self.lookup_policy_id(user_id, &PAYMENT).await?;
        let mut ret = self.lookup_policy_id(user_id, &RETURN).await?;

        // Partial overrides fill whatever the account lookup left open.
        fulfillment = fulfillment.or_else(|| overrides.fulfillment_policy_id.clone());
        payment = payment.or_else(|| overrides.payment_policy_id.clone());
        ret = ret.or_else(|| overrides.return_policy_id.clone());

        if let (Some(f), Some(p), Some(r)) = (&fulfillment, &payment, &ret) {
            return Ok(self.policy_set(f.clone(), p.clone(), r.clone()));
        }

        if !self.ensure_opted_in(user_id).await? {
            return Err(PublishError::MissingPolicies);
        }
        self.create_default_policies(user_id).await
    }

    /// Push the shipping-origin record. Failures (including "already exists")
    /// are logged and ignored; the key is always usable afterwards because
    /// the marketplace treats re-creation of an existing key as a no-op
    /// error.
    pub async fn ensure_merchant_location(&self, user_id: i64) -> Result<String, PublishError> {
        let key = self.config.merchant_location.key.clone();
        let path = format!("/sell/inventory/v1/location/{key}");
        match self
            .gateway
            .post(user_id, &path, Some(&merchant_location_payload(&self.config)))
            .await
        {
            Ok(response) if !response.is_success() => {
                warn!(
                    target = "listbridge.ebay",
                    status = response.status,
                    "merchant_location_create_skipped"
                );
            }
            Err(err) => {
                warn!(target = "listbridge.ebay", error = %err, "merchant_location_create_failed");
            }
            Ok(_) => {}
        }
        Ok(key)
    }

    async fn lookup_policy_id(
        &self,
        user_id: i64,
        category: &PolicyCategory,
    ) -> Result<Option<String>, PublishError> {
        let response = self
            .gateway
            .get(
                user_id,
                category.path,
                &[("marketplace_id", self.config.marketplace_id.as_str())],
            )
            .await?;
        if !response.is_success() {
            return Ok(None);
        }
        Ok(pick_policy_id(&response, category))
    }

    async fn ensure_opted_in(&self, user_id: i64) -> Result<bool, PublishError> {
        let response = self
            .gateway
            .get(user_id, "/sell/account/v1/program/get_opted_in_programs", &[])
            .await?;
        if !response.is_success() {
            return Ok(false);
        }

        let already = response
            .json()
            .and_then(|body| {
                body.get("programs").and_then(|programs| {
                    programs.as_array().map(|list| {
                        list.iter().any(|program| {
                            program.get("programType").and_then(Value::as_str)
                                == Some("SELLING_POLICY_MANAGEMENT")
                        })
                    })
                })
            })
            .unwrap_or(false);
        if already {
            return Ok(true);
        }

        let opt_in = self
            .gateway
            .post(
                user_id,
                "/sell/account/v1/program/opt_in",
                Some(&json!({"programType": "SELLING_POLICY_MANAGEMENT"})),
            )
            .await?;
        if opt_in.is_success() {
            info!(target = "listbridge.ebay", user_id, "selling_policy_management_opted_in");
        }
        Ok(opt_in.is_success())
    }

    async fn create_default_policies(&self, user_id: i64) -> Result<PolicySet, PublishError> {
        let fulfillment = self.create_fulfillment_policy(user_id).await?;
        let payment = self
            .create_policy(user_id, &PAYMENT, &payment_policy_payload(&self.config))
            .await?;
        let ret = self
            .create_policy(user_id, &RETURN, &return_policy_payload(&self.config))
            .await?;

        match (fulfillment, payment, ret) {
            (Some(f), Some(p), Some(r)) => Ok(self.policy_set(f, p, r)),
            _ => Err(PublishError::MissingPolicies),
        }
    }

    /// The flat-rate shipping service varies by account type, so candidate
    /// service codes are tried in order until one is accepted.
    async fn create_fulfillment_policy(
        &self,
        user_id: i64,
    ) -> Result<Option<String>, PublishError> {
        for service_code in SHIPPING_SERVICES {
            let payload = fulfillment_policy_payload(&self.config, service_code);
            if let Some(id) = self.create_policy(user_id, &FULFILLMENT, &payload).await? {
                return Ok(Some(id));
            }
        }
        self.lookup_policy_id(user_id, &FULFILLMENT).await
    }

    /// Create one policy, reusing the existing one when the marketplace
    /// reports a name collision.
    async fn create_policy(
        &self,
        user_id: i64,
        category: &PolicyCategory,
        payload: &Value,
    ) -> Result<Option<String>, PublishError> {
        let response = self.gateway.post(user_id, category.path, Some(payload)).await?;
        if response.is_success() {
            let id = response
                .json()
                .and_then(|body| body.get(category.id_key).and_then(Value::as_str).map(String::from));
            return Ok(id);
        }
        if creation_conflict(&response) {
            return self.lookup_policy_id(user_id, category).await;
        }
        warn!(
            target = "listbridge.ebay",
            path = category.path,
            status = response.status,
            "policy_create_rejected"
        );
        Ok(None)
    }

    fn policy_set(&self, fulfillment: String, payment: String, ret: String) -> PolicySet {
        PolicySet {
            fulfillment_policy_id: fulfillment,
            payment_policy_id: payment,
            return_policy_id: ret,
            merchant_location_key: self.config.merchant_location.key.clone(),
        }
    }
}

/// Prefer a policy named "default" or "standard" (case-insensitive
/// substring); otherwise take the first entry.
fn pick_policy_id(response: &ApiResponse, category: &PolicyCategory) -> Option<String> {
    let body = response.json()?;
    let policies = body.get(category.list_key)?.as_array()?.clone();
    let preferred = policies.iter().find(|policy| {
        policy
            .get("name")
            .and_then(Value::as_str)
            .map(|name| {
                let name = name.to_lowercase();
                name.contains("default") || name.contains("standard")
            })
            .unwrap_or(false)
    });
    preferred
        .or_else(|| policies.first())
        .and_then(|policy| policy.get(category.id_key).and_then(Value::as_str))
        .map(String::from)
}

/// Name-collision detection: check the structured error messages first and
/// fall back to a substring scan of the raw body.
fn creation_conflict(response: &ApiResponse) -> bool {
    if let Some(body) = response.json() {
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            let structured = errors.iter().any(|error| {
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(|message| message.to_lowercase().contains("already exists"))
                    .unwrap_or(false)
            });
            if structured {
                return true;
            }
        }
    }
    response.body.to_lowercase().contains("already exists")
}

fn fulfillment_policy_payload(config: &EbayConfig, service_code: &str) -> Value {
    json!({
        "name": format!("Standard Shipping ({service_code})"),
        "marketplaceId": config.marketplace_id,
        "categoryTypes": [{"name": "ALL_EXCLUDING_MOTORS_VEHICLES"}],
        "handlingTime": {"value": 1, "unit": "DAY"},
        "shippingOptions": [{
            "optionType": "DOMESTIC",
            "costType": "FLAT_RATE",
            "shippingServices": [{
                "shippingCarrierCode": "USPS",
                "shippingServiceCode": service_code,
                "freeShipping": false
            }]
        }]
    })
}

fn payment_policy_payload(config: &EbayConfig) -> Value {
    json!({
        "name": "Standard Payment",
        "marketplaceId": config.marketplace_id,
        "categoryTypes": [{"name": "ALL_EXCLUDING_MOTORS_VEHICLES"}],
        "immediatePay": false
    })
}

fn return_policy_payload(config: &EbayConfig) -> Value {
    json!({
        "name": "30-Day Returns",
        "marketplaceId": config.marketplace_id,
        "categoryTypes": [{"name": "ALL_EXCLUDING_MOTORS_VEHICLES"}],
        "returnsAccepted": true,
        "returnPeriod": {"value": 30, "unit": "DAY"},
        "refundMethod": "MONEY_BACK",
        "returnShippingCostPayer": "BUYER"
    })
}

fn merchant_location_payload(config: &EbayConfig) -> Value {
    let location = &config.merchant_location;
    json!({
        "name": location.name,
        "location": {
            "address": {
                "addressLine1": location.address_line1,
                "city": location.city,
                "stateOrProvince": location.state_or_province,
                "postalCode": location.postal_code,
                "country": location.country
            }
        },
        "locationInstructions": "Ships from main warehouse",
        "merchantLocationStatus": "ENABLED",
        "locationTypes": ["STORE"]
    })
}
