//! Wire-format types for the decision oracle and the market data feed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ==================== Oracle (OpenAI-compatible chat) ====================

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    pub content: String,
}

/// The oracle's decision payload as it appears on the wire. Everything is
/// optional here; required-field validation happens in the adapter so a
/// partially filled payload can be rejected as malformed with its raw text
/// preserved for audit.
#[derive(Debug, Deserialize)]
pub struct RawDecision {
    pub action: Option<String>,

    #[serde(alias = "asset")]
    pub symbol: Option<String>,

    pub confidence: Option<f64>,

    pub leverage: Option<Decimal>,

    #[serde(default)]
    pub reasoning: Option<String>,

    #[serde(default)]
    pub stop_loss: Option<Decimal>,

    #[serde(default)]
    pub take_profit: Option<Decimal>,

    #[serde(default)]
    pub exit_plan: Option<RawExitPlan>,
}

/// Nested exit plan object some oracle models emit.
#[derive(Debug, Deserialize)]
pub struct RawExitPlan {
    #[serde(default)]
    pub profit_target: Option<Decimal>,

    #[serde(default)]
    pub stop_loss: Option<Decimal>,

    #[serde(default)]
    pub invalidation: Option<String>,

    #[serde(default)]
    pub invalidation_price: Option<Decimal>,
}

// ==================== Market data (Binance public API) ====================

/// 24-hour ticker response; Binance serializes numbers as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerResponse {
    pub last_price: String,
    pub price_change_percent: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
}
