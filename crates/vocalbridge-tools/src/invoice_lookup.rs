//! InvoiceLookup builtin
//!
//! Resolves an order id or invoice number against a static order table and
//! returns the order's status, tracking, and line items.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;

use vocalbridge_core::Result;

use crate::registry::{DataAccess, Tool, ToolContext, ToolLimits, ToolOutcome, ToolPermissions};

struct OrderRecord {
    invoice_number: &'static str,
    status: &'static str,
    tracking: Option<&'static str>,
    items: &'static [(&'static str, &'static str, u32, i64)],
}

static ORDERS: Lazy<HashMap<&'static str, OrderRecord>> = Lazy::new(|| {
    HashMap::from([
        (
            "12345",
            OrderRecord {
                invoice_number: "INV-2024-0012",
                status: "SHIPPED",
                tracking: Some("1Z999AA10123456784"),
                items: &[
                    ("SKU-1001", "Wireless headset", 1, 7999),
                    ("SKU-2044", "USB-C dock", 1, 12950),
                ],
            },
        ),
        (
            "445566",
            OrderRecord {
                invoice_number: "INV-2024-0187",
                status: "PROCESSING",
                tracking: None,
                items: &[("SKU-3310", "Mechanical keyboard", 2, 8900)],
            },
        ),
        (
            "78901",
            OrderRecord {
                invoice_number: "INV-2023-0991",
                status: "DELIVERED",
                tracking: Some("1Z999AA10198765432"),
                items: &[("SKU-0042", "Laptop stand", 1, 4500)],
            },
        ),
    ])
});

fn find_by_invoice(invoice_number: &str) -> Option<(&'static str, &'static OrderRecord)> {
    ORDERS
        .iter()
        .find(|(_, record)| record.invoice_number == invoice_number)
        .map(|(order_id, record)| (*order_id, record))
}

fn render_order(order_id: &str, record: &OrderRecord) -> serde_json::Value {
    serde_json::json!({
        "orderId": order_id,
        "invoiceNumber": record.invoice_number,
        "status": record.status,
        "tracking": record.tracking,
        "items": record
            .items
            .iter()
            .map(|(sku, description, quantity, price_cents)| serde_json::json!({
                "sku": sku,
                "description": description,
                "quantity": quantity,
                "priceCents": price_cents,
            }))
            .collect::<Vec<_>>(),
    })
}

pub struct InvoiceLookup;

impl InvoiceLookup {
    pub fn new() -> Self {
        Self
    }
}

impl Default for InvoiceLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for InvoiceLookup {
    fn name(&self) -> &str {
        "InvoiceLookup"
    }

    fn description(&self) -> &str {
        "Look up an order by order id or invoice number and return its status, \
         tracking information, and line items."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "orderId": {
                    "type": "string",
                    "description": "Numeric order id",
                },
                "invoiceNumber": {
                    "type": "string",
                    "description": "Invoice number, e.g. INV-2024-0012",
                },
            },
        })
    }

    fn permissions(&self) -> ToolPermissions {
        ToolPermissions {
            data_access: DataAccess::TenantReadonly,
            network_access: false,
            estimated_cost_cents: 0,
        }
    }

    fn limits(&self) -> ToolLimits {
        ToolLimits {
            timeout_ms: 2_000,
            max_payload_bytes: 16 * 1024,
        }
    }

    async fn execute(&self, args: &serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
        let order_id = args.get("orderId").and_then(|v| v.as_str());
        let invoice_number = args.get("invoiceNumber").and_then(|v| v.as_str());

        let found = match (order_id, invoice_number) {
            (Some(order_id), None) => ORDERS
                .get(order_id)
                .map(|record| render_order(order_id, record)),
            (None, Some(invoice_number)) => find_by_invoice(invoice_number)
                .map(|(order_id, record)| render_order(order_id, record)),
            (Some(_), Some(_)) => {
                return Ok(ToolOutcome::failure(
                    "Provide exactly one of orderId or invoiceNumber, not both",
                ));
            }
            (None, None) => {
                return Ok(ToolOutcome::failure(
                    "Provide exactly one of orderId or invoiceNumber",
                ));
            }
        };

        Ok(match found {
            Some(order) => ToolOutcome::ok(order),
            None => ToolOutcome::failure("Order not found"),
        })
    }
}
