//! Order request / acknowledgement exchanged between DecisionEngine and
//! OrderIntake.
//!
//! These are JSON on the wire, so optional context fields can be added
//! without breaking the four-field minimum `{symbol, side, quantity, price}`.

use serde::{Deserialize, Serialize};

use super::symbol::symbol_to_bytes;

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// One order decided by the DecisionEngine. Sent exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: u32,
    /// Price observed at decision time.
    pub price: f64,
    /// Client-assigned identifier (uuid v4) for log correlation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving_average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Decision time, microseconds since epoch (0 = unknown).
    #[serde(default)]
    pub timestamp_us: u64,
}

impl OrderRequest {
    pub fn new(symbol: impl Into<String>, side: Side, quantity: u32, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price,
            order_id: String::new(),
            sentiment: None,
            moving_average: None,
            reason: None,
            timestamp_us: 0,
        }
    }

    /// Semantic checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), String> {
        if symbol_to_bytes(&self.symbol).is_none() {
            return Err(format!("invalid symbol '{}'", self.symbol));
        }
        if self.quantity == 0 {
            return Err("quantity must be positive".to_string());
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(format!("invalid price {}", self.price));
        }
        Ok(())
    }
}

/// OrderIntake's answer to one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Order-log sequence number assigned to an accepted order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl OrderAck {
    pub fn accepted(seq: u64) -> Self {
        Self { accepted: true, reason: None, seq: Some(seq) }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { accepted: false, reason: Some(reason.into()), seq: None }
    }
}
