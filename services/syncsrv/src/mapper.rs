//! Field mapping between the source and target domain models
//!
//! Pure functions with no I/O. A malformed record yields
//! [`SyncError::MappingError`], which aborts the enclosing sync before either
//! system's write API is contacted.

use crate::error::{Result, SyncError};
use crate::model::{
    MappedProductUpdate, OrderRecord, ProductRecord, SourceCustomer, SourceOrderDraft,
    SourceOrderLine,
};

fn non_negative(value: f64, field: &str, key: &str) -> Result<f64> {
    if !value.is_finite() {
        return Err(SyncError::mapping(format!(
            "{} of {} is not a number",
            field, key
        )));
    }
    if value < 0.0 {
        return Err(SyncError::mapping(format!(
            "{} of {} is negative ({})",
            field, key, value
        )));
    }
    Ok(value)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Map a source product onto the target's price/advanced price/quantity
pub fn map_product(record: &ProductRecord) -> Result<MappedProductUpdate> {
    let sku = record.sku.trim();
    if sku.is_empty() {
        return Err(SyncError::mapping("product has no SKU"));
    }

    let target_price = non_negative(record.retail_price, "retail price", sku)?;
    let target_advanced_price = record
        .promo_price
        .map(|promo| non_negative(promo, "promo price", sku))
        .transpose()?;

    if !record.quantity.is_finite() {
        return Err(SyncError::mapping(format!(
            "quantity of {} is not a number",
            sku
        )));
    }

    Ok(MappedProductUpdate {
        sku: sku.to_string(),
        target_price,
        target_advanced_price,
        target_quantity: record.quantity.max(0.0),
    })
}

/// Map a target order onto a source sales-order draft
///
/// SKUs and unit prices are carried over exactly; no currency conversion.
pub fn map_order(order: &OrderRecord) -> Result<SourceOrderDraft> {
    let order_id = order.order_id.trim();
    if order_id.is_empty() {
        return Err(SyncError::mapping("order has no id"));
    }
    if order.line_items.is_empty() {
        return Err(SyncError::mapping(format!(
            "order {} has no line items",
            order_id
        )));
    }

    let mut lines = Vec::with_capacity(order.line_items.len());
    for (index, line) in order.line_items.iter().enumerate() {
        let sku = line.sku.trim();
        if sku.is_empty() {
            return Err(SyncError::mapping(format!(
                "line {} of order {} has no SKU",
                index + 1,
                order_id
            )));
        }
        if !line.qty.is_finite() || line.qty <= 0.0 {
            return Err(SyncError::mapping(format!(
                "line {} ({}) of order {} has invalid quantity {}",
                index + 1,
                sku,
                order_id,
                line.qty
            )));
        }
        let price_unit = non_negative(line.unit_price, "unit price", sku)?;
        lines.push(SourceOrderLine {
            sku: sku.to_string(),
            quantity: line.qty,
            price_unit,
        });
    }

    let customer = &order.customer_ref;
    let email = customer.email.trim();
    if email.is_empty() {
        return Err(SyncError::mapping(format!(
            "order {} has no customer email",
            order_id
        )));
    }
    let name = format!("{} {}", customer.first_name.trim(), customer.last_name.trim())
        .trim()
        .to_string();

    let currency = order.currency.trim();
    if currency.is_empty() {
        return Err(SyncError::mapping(format!(
            "order {} has no currency",
            order_id
        )));
    }

    let date_order = order.placed_at.ok_or_else(|| {
        SyncError::mapping(format!("order {} has no placement timestamp", order_id))
    })?;

    Ok(SourceOrderDraft {
        external_ref: order_id.to_string(),
        customer: SourceCustomer {
            name: if name.is_empty() {
                email.to_string()
            } else {
                name
            },
            email: email.to_string(),
            phone: non_empty(customer.phone.as_deref()),
            street: non_empty(customer.street.as_deref()),
            city: non_empty(customer.city.as_deref()),
            zip: non_empty(customer.zip.as_deref()),
            country_code: non_empty(customer.country_code.as_deref())
                .map(|code| code.to_uppercase()),
        },
        lines,
        currency: currency.to_string(),
        date_order,
    })
}
