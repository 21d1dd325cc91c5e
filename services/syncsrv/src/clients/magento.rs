//! Magento client over the REST API (`/rest/V1`)
//!
//! Authenticates with an admin token that is cached for the configured
//! lifetime. A 401 drops the cached token so the next attempt logs in again.

use super::{error_for_status, error_for_transport, Side, TargetSystemClient};
use crate::config::MagentoConfig;
use crate::error::{Result, SyncError};
use crate::model::{CustomerRef, MappedProductUpdate, OrderLine, OrderRecord, TargetProductState};
use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use errors::{invalid_config, BridgeResult};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Status-history comment that marks an order as imported into the ERP
pub const IMPORT_MARKER: &str = "Imported to Odoo by syncsrv";

const SPECIAL_PRICE: &str = "special_price";
const DEFAULT_STOCK_ID: &str = "1";
const MAGENTO_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MAX_PAGES: u32 = 10_000;

// ============================================================================
// REST payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct MagentoProduct {
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    custom_attributes: Vec<CustomAttribute>,
    #[serde(default)]
    extension_attributes: Option<ProductExtension>,
}

#[derive(Debug, Deserialize)]
struct CustomAttribute {
    attribute_code: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct ProductExtension {
    #[serde(default)]
    stock_item: Option<StockItem>,
}

#[derive(Debug, Deserialize)]
struct StockItem {
    #[serde(default)]
    qty: Option<f64>,
}

/// Attribute values arrive as strings ("8.000000") or numbers
fn attribute_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

impl MagentoProduct {
    fn into_state(self) -> TargetProductState {
        let advanced_price = self
            .custom_attributes
            .iter()
            .find(|attr| attr.attribute_code == SPECIAL_PRICE)
            .and_then(|attr| attribute_amount(&attr.value));
        let quantity = self
            .extension_attributes
            .and_then(|ext| ext.stock_item)
            .and_then(|stock| stock.qty)
            .unwrap_or(0.0);

        TargetProductState {
            price: self.price.unwrap_or(0.0),
            advanced_price,
            quantity,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrderSearchResult {
    #[serde(default)]
    items: Vec<MagentoOrder>,
    #[serde(default)]
    total_count: usize,
}

#[derive(Debug, Deserialize)]
struct MagentoOrder {
    entity_id: u64,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    order_currency_code: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    billing_address: Option<MagentoAddress>,
    #[serde(default)]
    items: Vec<MagentoOrderItem>,
    #[serde(default)]
    status_histories: Vec<StatusHistory>,
}

#[derive(Debug, Default, Deserialize)]
struct MagentoAddress {
    #[serde(default)]
    firstname: Option<String>,
    #[serde(default)]
    lastname: Option<String>,
    #[serde(default)]
    telephone: Option<String>,
    #[serde(default)]
    street: Vec<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    postcode: Option<String>,
    #[serde(default)]
    country_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MagentoOrderItem {
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    qty_ordered: Option<f64>,
    #[serde(default)]
    price: Option<f64>,
    /// Set on children of configurable and bundle items
    #[serde(default)]
    parent_item_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatusHistory {
    #[serde(default)]
    comment: Option<String>,
}

impl MagentoOrder {
    fn is_imported(&self) -> bool {
        self.status_histories
            .iter()
            .any(|h| h.comment.as_deref() == Some(IMPORT_MARKER))
    }

    fn into_record(self) -> OrderRecord {
        let billing = self.billing_address.unwrap_or_default();
        let placed_at = self.created_at.as_deref().and_then(|raw| {
            NaiveDateTime::parse_from_str(raw, MAGENTO_TIME_FORMAT)
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        });

        // Missing quantity maps to zero so the mapper rejects the line
        let line_items = self
            .items
            .into_iter()
            .filter(|item| item.parent_item_id.is_none())
            .map(|item| OrderLine {
                sku: item.sku.unwrap_or_default(),
                qty: item.qty_ordered.unwrap_or(0.0),
                unit_price: item.price.unwrap_or(0.0),
            })
            .collect();

        OrderRecord {
            order_id: self.entity_id.to_string(),
            line_items,
            customer_ref: CustomerRef {
                email: self.customer_email.unwrap_or_default(),
                first_name: billing.firstname.unwrap_or_default(),
                last_name: billing.lastname.unwrap_or_default(),
                phone: billing.telephone,
                street: billing.street.into_iter().next(),
                city: billing.city,
                zip: billing.postcode,
                country_code: billing.country_id,
            },
            currency: self.order_currency_code.unwrap_or_default(),
            placed_at,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// REST client for Magento 2
pub struct MagentoClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    token_lifetime: Duration,
    page_size: u32,
    new_order_statuses: Vec<String>,
    token: Mutex<Option<CachedToken>>,
}

impl MagentoClient {
    pub fn new(config: &MagentoConfig) -> BridgeResult<Self> {
        let base_url = Url::parse(config.url.trim())
            .map_err(|e| invalid_config!("magento.url", e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid_config!("magento.url", "must be an absolute http(s) URL"));
        }
        let http = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            http,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            token_lifetime: config.token_lifetime(),
            page_size: config.page_size,
            new_order_statuses: config.new_order_statuses.clone(),
            token: Mutex::new(None),
        })
    }

    /// `{base}/rest/V1/{segments...}` with every segment percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::TargetUnavailable("magento base URL cannot hold a path".into()))?
            .pop_if_empty()
            .extend(["rest", "V1"])
            .extend(segments);
        Ok(url)
    }

    async fn token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let context = "magento admin token";
        let url = self.url(&["integration", "admin", "token"])?;
        let response = self
            .http
            .post(url)
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await
            .map_err(|e| error_for_transport(Side::Target, &e, context))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(Side::Target, status, context, &body));
        }

        let value: String = response
            .json()
            .await
            .map_err(|e| error_for_transport(Side::Target, &e, context))?;
        debug!("Fetched Magento admin token");

        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + self.token_lifetime,
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Authenticated request returning the parsed JSON body (`Null` when empty)
    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let context = format!("magento {} {}", method, segments.join("/"));
        let url = self.url(segments)?;
        let token = self.token().await?;

        let mut request = self.http.request(method, url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| error_for_transport(Side::Target, &e, &context))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| error_for_transport(Side::Target, &e, &context))?;

        if status == StatusCode::UNAUTHORIZED {
            warn!("Magento rejected the admin token, re-authenticating on next call");
            self.invalidate_token().await;
        }
        if !status.is_success() {
            return Err(error_for_status(Side::Target, status, &context, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| SyncError::rejected(format!("{}: unexpected response: {}", context, e)))
    }

    async fn search_orders_page(&self, status: &str, page: u32) -> Result<OrderSearchResult> {
        let filter = "searchCriteria[filterGroups][0][filters][0]";
        let query = vec![
            (format!("{}[field]", filter), "status".to_string()),
            (format!("{}[value]", filter), status.to_string()),
            (format!("{}[conditionType]", filter), "eq".to_string()),
            ("searchCriteria[pageSize]".to_string(), self.page_size.to_string()),
            ("searchCriteria[currentPage]".to_string(), page.to_string()),
        ];
        let value = self.request(Method::GET, &["orders"], &query, None).await?;
        serde_json::from_value(value)
            .map_err(|e| SyncError::rejected(format!("magento order search: {}", e)))
    }
}

#[async_trait]
impl TargetSystemClient for MagentoClient {
    async fn get_product_state(&self, sku: &str) -> Result<TargetProductState> {
        let value = self.request(Method::GET, &["products", sku], &[], None).await?;
        let product: MagentoProduct = serde_json::from_value(value)
            .map_err(|e| SyncError::rejected(format!("magento product {}: {}", sku, e)))?;
        Ok(product.into_state())
    }

    async fn update_product(&self, sku: &str, update: &MappedProductUpdate) -> Result<()> {
        let stock = json!({
            "stockItem": {
                "qty": update.target_quantity,
                "is_in_stock": update.target_quantity > 0.0,
            }
        });
        self.request(
            Method::PUT,
            &["products", sku, "stockItems", DEFAULT_STOCK_ID],
            &[],
            Some(&stock),
        )
        .await?;

        let special_price = update
            .target_advanced_price
            .map(|price| Value::String(price.to_string()))
            .unwrap_or(Value::Null);
        let product = json!({
            "product": {
                "sku": sku,
                "price": update.target_price,
                "custom_attributes": [
                    { "attribute_code": SPECIAL_PRICE, "value": special_price }
                ],
            }
        });
        self.request(Method::PUT, &["products", sku], &[], Some(&product))
            .await?;

        debug!(
            "Magento product {} updated: price={} special={:?} qty={}",
            sku, update.target_price, update.target_advanced_price, update.target_quantity
        );
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderRecord> {
        let value = self.request(Method::GET, &["orders", order_id], &[], None).await?;
        let order: MagentoOrder = serde_json::from_value(value)
            .map_err(|e| SyncError::rejected(format!("magento order {}: {}", order_id, e)))?;
        Ok(order.into_record())
    }

    async fn list_new_orders(&self) -> Result<Vec<OrderRecord>> {
        let mut seen = HashSet::new();
        let mut orders = Vec::new();

        for status in &self.new_order_statuses {
            let mut fetched = 0usize;
            for page in 1..=MAX_PAGES {
                let result = self.search_orders_page(status, page).await?;
                if result.items.is_empty() {
                    break;
                }
                fetched += result.items.len();

                for order in result.items {
                    if order.is_imported() || !seen.insert(order.entity_id) {
                        continue;
                    }
                    orders.push(order.into_record());
                }
                if fetched >= result.total_count {
                    break;
                }
            }
        }

        info!("Magento lists {} new orders", orders.len());
        Ok(orders)
    }

    async fn mark_order_imported(&self, order_id: &str) -> Result<()> {
        let body = json!({
            "statusHistory": {
                "comment": IMPORT_MARKER,
                "is_customer_notified": 0,
                "is_visible_on_front": 0,
            }
        });
        self.request(
            Method::POST,
            &["orders", order_id, "comments"],
            &[],
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.token().await.map(|_| ())
    }
}
