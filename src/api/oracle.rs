//! Decision oracle adapter.
//!
//! Sends one chat-completions request per symbol to an OpenAI-compatible
//! reasoning endpoint and parses the reply into a typed [`Decision`].
//! All failure modes are typed: authentication problems are fatal to the
//! scheduler, everything else degrades to a skipped symbol for the cycle.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Decision, DecisionAction, Position, PositionSide};

use super::market::MarketSnapshot;
use super::types::{ChatMessage, ChatRequest, ChatResponse, RawDecision, ResponseFormat};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "qwen/qwen-2.5-72b-instruct";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const SYSTEM_PROMPT: &str = r#"You are a professional cryptocurrency trader managing a simulated leveraged portfolio.

Analyze the market data and decide on ONE action for the symbol you are asked about.

Respond with ONLY a JSON object in this exact shape:
{
    "action": "BUY" | "SELL" | "HOLD",
    "confidence": <0.0-1.0>,
    "leverage": <number >= 1>,
    "reasoning": "<your analysis>",
    "exit_plan": {
        "profit_target": <price or null>,
        "stop_loss": <price or null>,
        "invalidation": "<condition that invalidates the thesis, or null>",
        "invalidation_price": <price level for the invalidation, or null>
    }
}

BUY opens or keeps a long bias, SELL opens a short (or closes an open long), HOLD does nothing.
When opening a position, include an exit_plan with a concrete stop_loss and profit_target."#;

/// Typed oracle failure. Only `Auth` is fatal; everything else means "no
/// decision for this symbol this cycle".
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle authentication failed: {0}")]
    Auth(String),

    #[error("oracle rate limited")]
    RateLimited,

    #[error("oracle request timed out")]
    Timeout,

    #[error("oracle transport failure: {0}")]
    Transport(String),

    #[error("malformed oracle response: {reason}")]
    Malformed { reason: String, raw: String },
}

impl OracleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, OracleError::Auth(_))
    }

    /// Raw payload to keep for audit, when there is one.
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            OracleError::Malformed { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Oracle endpoint configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OracleConfig {
    /// Read `ORACLE_API_KEY` (required), `ORACLE_BASE_URL` and `ORACLE_MODEL`
    /// (optional) from the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ORACLE_API_KEY")
            .context("ORACLE_API_KEY not set; the decision oracle needs credentials")?;

        Ok(Self {
            api_key,
            base_url: std::env::var("ORACLE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            model: std::env::var("ORACLE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }
}

/// Everything the oracle sees for one symbol in one cycle.
pub struct DecisionRequest<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub open_position: Option<&'a Position>,
    pub equity: Decimal,
    pub available_cash: Decimal,
    pub roi: Decimal,
    pub initial_balance: Decimal,
}

/// Client for the external reasoning service.
pub struct OracleClient {
    client: Client,
    config: OracleConfig,
}

impl OracleClient {
    pub fn new(config: OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Ask the oracle for a decision on one symbol.
    pub async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, OracleError> {
        let symbol = &request.snapshot.symbol;
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(request),
                },
            ],
            temperature: 0.7,
            max_tokens: 2000,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        debug!(symbol = %symbol, model = %self.config.model, "requesting oracle decision");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                return Err(OracleError::Auth(body));
            }
            StatusCode::TOO_MANY_REQUESTS => return Err(OracleError::RateLimited),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(OracleError::Transport(format!("{status} - {body}")));
            }
            _ => {}
        }

        let chat: ChatResponse = response.json().await.map_err(|e| OracleError::Malformed {
            reason: format!("bad completion envelope: {e}"),
            raw: String::new(),
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::Malformed {
                reason: "completion has no choices".to_string(),
                raw: String::new(),
            })?;

        parse_decision(symbol, &content, request.open_position.map(|p| p.side))
    }
}

/// Parse and validate the oracle's JSON into a [`Decision`].
///
/// Required fields are `action`, `confidence`, and `leverage`; anything
/// missing or unrecognized rejects the whole payload rather than letting a
/// partially filled decision through.
pub fn parse_decision(
    symbol: &str,
    content: &str,
    open_side: Option<PositionSide>,
) -> Result<Decision, OracleError> {
    let malformed = |reason: String| OracleError::Malformed {
        reason,
        raw: content.to_string(),
    };

    let raw: RawDecision = serde_json::from_str(content)
        .map_err(|e| malformed(format!("not a decision object: {e}")))?;

    // The request was for one symbol; a decision about a different one is
    // not safe to apply.
    if let Some(decided) = &raw.symbol {
        if !decided.eq_ignore_ascii_case(symbol) {
            return Err(malformed(format!(
                "decision is for {decided}, expected {symbol}"
            )));
        }
    }

    let action_str = raw
        .action
        .ok_or_else(|| malformed("missing required field: action".to_string()))?;

    let action = match action_str.to_ascii_lowercase().as_str() {
        "buy" | "open_long" => DecisionAction::Buy,
        "sell" | "open_short" => DecisionAction::Sell,
        "hold" => DecisionAction::Hold,
        // Legacy vocabulary: close whatever is open by recommending the
        // opposing direction; with nothing open there is nothing to close.
        "close_position" => match open_side {
            Some(PositionSide::Long) => DecisionAction::Sell,
            Some(PositionSide::Short) => DecisionAction::Buy,
            None => {
                warn!(symbol, "oracle asked to close with no open position, holding");
                DecisionAction::Hold
            }
        },
        other => return Err(malformed(format!("unknown action: {other}"))),
    };

    let confidence = raw
        .confidence
        .ok_or_else(|| malformed("missing required field: confidence".to_string()))?;

    let leverage = raw
        .leverage
        .ok_or_else(|| malformed("missing required field: leverage".to_string()))?;

    let exit_plan = raw.exit_plan;
    let (stop_loss, take_profit, exit_condition, exit_condition_price) = match exit_plan {
        Some(plan) => (
            raw.stop_loss.or(plan.stop_loss),
            raw.take_profit.or(plan.profit_target),
            plan.invalidation,
            plan.invalidation_price,
        ),
        None => (raw.stop_loss, raw.take_profit, None, None),
    };

    Ok(Decision {
        symbol: symbol.to_string(),
        action,
        confidence,
        leverage,
        reasoning: raw.reasoning.unwrap_or_default(),
        exit_condition,
        exit_condition_price,
        stop_loss,
        take_profit,
        timestamp: Utc::now(),
    })
}

/// Build the per-symbol user prompt: market state, account state, and the
/// open position if any.
fn build_prompt(request: &DecisionRequest<'_>) -> String {
    let snap = request.snapshot;
    let mut prompt = format!(
        "CURRENT MARKET STATE FOR {symbol}\n\n\
         current_price = {price}\n\
         24-hour range: High: {high}, Low: {low}, Change: {change}%\n\
         24-hour volume: {volume}\n\n\
         YOUR ACCOUNT\n\n\
         Current Total Return (percent): {roi}\n\
         Available Cash: {cash}\n\
         Current Account Value: {equity}\n\
         Initial Balance: {initial}\n",
        symbol = snap.symbol,
        price = snap.price,
        high = snap.high_24h,
        low = snap.low_24h,
        change = snap.change_24h,
        volume = snap.volume_24h,
        roi = request.roi * Decimal::ONE_HUNDRED,
        cash = request.available_cash,
        equity = request.equity,
        initial = request.initial_balance,
    );

    match request.open_position {
        Some(pos) => {
            prompt.push_str(&format!(
                "\nOpen position in {symbol}: side={side}, entry_price={entry}, \
                 current_price={price}, leverage={leverage}x, unrealized_pnl={pnl}, \
                 stop_loss={stop}, take_profit={tp}\n",
                symbol = pos.symbol,
                side = pos.side.as_str(),
                entry = pos.entry_price,
                price = snap.price,
                leverage = pos.leverage,
                pnl = pos.unrealized_pnl(snap.price),
                stop = pos.stop_loss,
                tp = pos
                    .take_profit
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            ));
        }
        None => prompt.push_str("\nNo open position in this symbol.\n"),
    }

    prompt.push_str(
        "\nMAKE YOUR TRADING DECISION for this symbol and respond with the JSON object only.\n",
    );
    prompt
}
