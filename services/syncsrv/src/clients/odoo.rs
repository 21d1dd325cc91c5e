//! Odoo client over JSON-RPC
//!
//! Products are `product.product` records keyed by `default_code`; sales
//! orders carry the storefront order id in `client_order_ref`.

use super::{error_for_status, error_for_transport, Side, SourceSystemClient};
use crate::config::OdooConfig;
use crate::error::{Result, SyncError};
use crate::model::{amounts_equal, ProductRecord, SourceCustomer, SourceOrderDraft};
use async_trait::async_trait;
use errors::BridgeResult;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PRODUCT_MODEL: &str = "product.product";
const ORDER_MODEL: &str = "sale.order";
const PARTNER_MODEL: &str = "res.partner";
const COUNTRY_MODEL: &str = "res.country";
const PRICELIST_MODEL: &str = "product.pricelist";

const PRODUCT_FIELDS: &[&str] = &["default_code", "list_price", "lst_price", "qty_available"];

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

impl RpcError {
    fn name(&self) -> &str {
        self.data.as_ref().map(|d| d.name.as_str()).unwrap_or("")
    }

    fn detail(&self) -> &str {
        match &self.data {
            Some(data) if !data.message.is_empty() => &data.message,
            _ => &self.message,
        }
    }

    fn is_auth_failure(&self) -> bool {
        let name = self.name();
        name.contains("AccessDenied") || name.contains("SessionExpired")
    }

    fn into_sync_error(self, context: &str) -> SyncError {
        let name = self.name().to_string();
        let msg = format!("{}: {} ({})", context, self.detail(), name);
        let text = format!("{} {}", name, self.detail());

        if self.is_auth_failure()
            || text.contains("OperationalError")
            || text.contains("SerializationFailure")
        {
            SyncError::SourceUnavailable(msg)
        } else if text.contains("UniqueViolation") || text.contains("duplicate key") {
            SyncError::DuplicateOrder(msg)
        } else if name.contains("MissingError") {
            SyncError::NotFound(msg)
        } else {
            SyncError::ValidationRejected(msg)
        }
    }
}

/// `product.product` row as returned by `search_read`
#[derive(Debug, Deserialize)]
struct ProductRow {
    #[serde(default)]
    default_code: Value,
    #[serde(default)]
    list_price: f64,
    #[serde(default)]
    lst_price: Option<f64>,
    #[serde(default)]
    qty_available: f64,
}

impl ProductRow {
    fn sku(&self) -> Option<&str> {
        odoo_str(&self.default_code)
    }

    /// Sales price only counts as a promotion when below the list price
    fn into_record(self, sku: &str) -> ProductRecord {
        let retail_price = self.list_price;
        ProductRecord {
            sku: sku.to_string(),
            quantity: self.qty_available,
            retail_price,
            promo_price: self
                .lst_price
                .filter(|price| *price < retail_price && !amounts_equal(*price, retail_price)),
        }
    }
}

/// Odoo encodes empty char fields as `false`
fn odoo_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_ids(value: Value, context: &str) -> Result<Vec<i64>> {
    serde_json::from_value(value)
        .map_err(|e| SyncError::rejected(format!("{}: unexpected id list: {}", context, e)))
}

fn parse_created_id(value: Value, context: &str) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| SyncError::rejected(format!("{}: id out of range", context))),
        Value::Array(items) => items
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::rejected(format!("{}: empty id list", context))),
        other => Err(SyncError::rejected(format!(
            "{}: unexpected create result {}",
            context, other
        ))),
    }
}

/// JSON-RPC client for Odoo
pub struct OdooClient {
    http: Client,
    endpoint: String,
    database: String,
    username: String,
    password: String,
    uid: Mutex<Option<i64>>,
    request_id: AtomicU64,
}

impl OdooClient {
    pub fn new(config: &OdooConfig) -> BridgeResult<Self> {
        let http = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/jsonrpc", config.url.trim_end_matches('/')),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            uid: Mutex::new(None),
            request_id: AtomicU64::new(1),
        })
    }

    /// One JSON-RPC round trip; returns `result` or the classified `error`
    async fn call(&self, service: &str, method: &str, args: Value) -> Result<Value> {
        let context = format!("odoo {}.{}", service, method);
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": id,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| error_for_transport(Side::Source, &e, &context))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(error_for_status(Side::Source, status, &context, &text));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| error_for_transport(Side::Source, &e, &context))?;

        if let Some(error) = rpc.error {
            if error.is_auth_failure() {
                *self.uid.lock().await = None;
            }
            return Err(error.into_sync_error(&context));
        }
        Ok(rpc.result.unwrap_or(Value::Null))
    }

    /// Cached user id, logging in on first use
    async fn uid(&self) -> Result<i64> {
        if let Some(uid) = *self.uid.lock().await {
            return Ok(uid);
        }

        // Lock is not held across the login call; `call` clears it on auth errors
        let result = self
            .call(
                "common",
                "login",
                json!([self.database, self.username, self.password]),
            )
            .await?;
        let uid = result.as_i64().ok_or_else(|| {
            SyncError::SourceUnavailable(format!(
                "odoo login rejected for user {} on database {}",
                self.username, self.database
            ))
        })?;

        info!("Odoo login ok: uid={} db={}", uid, self.database);
        *self.uid.lock().await = Some(uid);
        Ok(uid)
    }

    async fn execute_kw(&self, model: &str, method: &str, args: Value, kwargs: Value) -> Result<Value> {
        let uid = self.uid().await?;
        self.call(
            "object",
            "execute_kw",
            json!([self.database, uid, self.password, model, method, args, kwargs]),
        )
        .await
    }

    async fn search(&self, model: &str, domain: Value, limit: Option<u32>) -> Result<Vec<i64>> {
        let kwargs = match limit {
            Some(limit) => json!({ "limit": limit }),
            None => json!({}),
        };
        let result = self.execute_kw(model, "search", json!([domain]), kwargs).await?;
        parse_ids(result, model)
    }

    async fn create(&self, model: &str, values: Value) -> Result<i64> {
        let result = self.execute_kw(model, "create", json!([values]), json!({})).await?;
        parse_created_id(result, model)
    }

    /// Pricelist in the order currency; prices are carried over without conversion
    async fn pricelist_for(&self, order_ref: &str, currency: &str) -> Result<i64> {
        let ids = self
            .search(
                PRICELIST_MODEL,
                json!([["currency_id.name", "=", currency]]),
                Some(1),
            )
            .await?;
        ids.first().copied().ok_or_else(|| {
            SyncError::rejected(format!(
                "order {}: no odoo pricelist in currency {}",
                order_ref, currency
            ))
        })
    }

    async fn find_product_id(&self, sku: &str) -> Result<Option<i64>> {
        let ids = self
            .search(PRODUCT_MODEL, json!([["default_code", "=", sku]]), Some(1))
            .await?;
        Ok(ids.first().copied())
    }

    async fn find_country_id(&self, code: &str) -> Result<Option<i64>> {
        let ids = self
            .search(
                COUNTRY_MODEL,
                json!([["code", "=", code.to_uppercase()]]),
                Some(1),
            )
            .await?;
        Ok(ids.first().copied())
    }

    /// Partner by email, created when missing
    async fn ensure_partner(&self, customer: &SourceCustomer) -> Result<i64> {
        let existing = self
            .search(PARTNER_MODEL, json!([["email", "=", customer.email]]), Some(1))
            .await?;
        if let Some(id) = existing.first() {
            return Ok(*id);
        }

        let country_id = match &customer.country_code {
            Some(code) => {
                let id = self.find_country_id(code).await?;
                if id.is_none() {
                    warn!("Unknown country code {} for {}", code, customer.email);
                }
                id
            },
            None => None,
        };

        let id = self
            .create(
                PARTNER_MODEL,
                json!({
                    "name": customer.name,
                    "email": customer.email,
                    "phone": customer.phone,
                    "street": customer.street,
                    "city": customer.city,
                    "zip": customer.zip,
                    "country_id": country_id,
                }),
            )
            .await?;
        info!("Created Odoo partner {} for {}", id, customer.email);
        Ok(id)
    }
}

#[async_trait]
impl SourceSystemClient for OdooClient {
    async fn get_product(&self, sku: &str) -> Result<ProductRecord> {
        let rows = self
            .execute_kw(
                PRODUCT_MODEL,
                "search_read",
                json!([[["default_code", "=", sku]]]),
                json!({ "fields": PRODUCT_FIELDS, "limit": 1 }),
            )
            .await?;
        let rows: Vec<ProductRow> = serde_json::from_value(rows)
            .map_err(|e| SyncError::rejected(format!("odoo product {}: {}", sku, e)))?;

        rows.into_iter()
            .next()
            .map(|row| row.into_record(sku))
            .ok_or_else(|| SyncError::not_found(format!("product {} in odoo", sku)))
    }

    async fn list_product_skus(&self) -> Result<Vec<String>> {
        let rows = self
            .execute_kw(
                PRODUCT_MODEL,
                "search_read",
                json!([[]]),
                json!({ "fields": ["default_code"] }),
            )
            .await?;
        let rows: Vec<ProductRow> = serde_json::from_value(rows)
            .map_err(|e| SyncError::rejected(format!("odoo product list: {}", e)))?;

        let total = rows.len();
        let skus: Vec<String> = rows
            .iter()
            .filter_map(|row| row.sku().map(str::to_string))
            .collect();
        if skus.len() < total {
            warn!(
                "Skipping {} Odoo products without SKU (of {})",
                total - skus.len(),
                total
            );
        }
        debug!("Odoo lists {} products with SKU", skus.len());
        Ok(skus)
    }

    async fn create_order(&self, draft: &SourceOrderDraft) -> Result<String> {
        let pricelist_id = self.pricelist_for(&draft.external_ref, &draft.currency).await?;
        let partner_id = self.ensure_partner(&draft.customer).await?;

        let mut order_lines = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            let product_id = self.find_product_id(&line.sku).await?.ok_or_else(|| {
                SyncError::rejected(format!(
                    "order {}: product {} not found in odoo",
                    draft.external_ref, line.sku
                ))
            })?;
            order_lines.push(json!([
                0,
                0,
                {
                    "product_id": product_id,
                    "product_uom_qty": line.quantity,
                    "price_unit": line.price_unit,
                }
            ]));
        }

        let order_id = self
            .create(
                ORDER_MODEL,
                json!({
                    "partner_id": partner_id,
                    "pricelist_id": pricelist_id,
                    "client_order_ref": draft.external_ref,
                    "date_order": draft.date_order.format("%Y-%m-%d %H:%M:%S").to_string(),
                    "order_line": order_lines,
                }),
            )
            .await?;

        info!(
            "Created Odoo sale order {} for storefront order {}",
            order_id, draft.external_ref
        );
        Ok(order_id.to_string())
    }

    async fn has_order_with_external_ref(&self, order_id: &str) -> Result<bool> {
        let count = self
            .execute_kw(
                ORDER_MODEL,
                "search_count",
                json!([[["client_order_ref", "=", order_id]]]),
                json!({}),
            )
            .await?;
        let count = count.as_i64().ok_or_else(|| {
            SyncError::rejected(format!(
                "odoo order count for reference {}: unexpected result {}",
                order_id, count
            ))
        })?;
        Ok(count > 0)
    }

    async fn ping(&self) -> Result<()> {
        self.call("common", "version", json!([])).await?;
        self.uid().await.map(|_| ())
    }
}
