//! Convert a human-readable token amount into base units
//!
//! "1.5" USDC (6 decimals) becomes "1500000". The math is done on the decimal
//! string so large 18-decimal amounts never pass through a float.

use crate::error::ToolExecutionError;
use crate::tools::builtin::token_lookup::TokenTable;
use crate::tools::registry::Tool;
use crate::tools::types::{PropertySchema, ToolCategory, ToolContext, ToolDefinition, ToolInputSchema};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct ToRawAmountTool {
    definition: ToolDefinition,
    tokens: Arc<TokenTable>,
}

impl ToRawAmountTool {
    pub fn new(tokens: Arc<TokenTable>) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "amount".to_string(),
            PropertySchema::string("Human-readable amount, e.g. '1.5'"),
        );
        properties.insert(
            "decimals".to_string(),
            PropertySchema {
                schema_type: "integer".to_string(),
                description: "Token decimals. Optional when 'symbol' is given.".to_string(),
                default: None,
                items: None,
                enum_values: None,
            },
        );
        properties.insert(
            "symbol".to_string(),
            PropertySchema::string("Token symbol used to look up decimals when 'decimals' is omitted"),
        );
        properties.insert(
            "network".to_string(),
            PropertySchema::string("Network for the symbol lookup").with_enum(&["base", "mainnet"]),
        );

        Self {
            definition: ToolDefinition {
                name: "to_raw_amount".to_string(),
                description: "Convert a human-readable token amount to raw base units (wei-style integer string).".to_string(),
                input_schema: ToolInputSchema {
                    schema_type: "object".to_string(),
                    properties,
                    required: vec!["amount".to_string()],
                },
                category: ToolCategory::Wallet,
            },
            tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToRawAmountParams {
    amount: Value,
    #[serde(default)]
    decimals: Option<u8>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    network: Option<String>,
}

/// Scale a non-negative decimal string by `10^decimals`
pub fn to_raw_amount(amount: &str, decimals: u8) -> Result<String, String> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err("Amount cannot be empty".to_string());
    }

    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(format!("Invalid amount '{}'", amount));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Invalid amount '{}': only non-negative decimal numbers are supported", amount));
    }

    let decimals = decimals as usize;
    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals {
        return Err(format!(
            "Amount '{}' has more precision than the token's {} decimals",
            amount, decimals
        ));
    }

    let mut raw = String::with_capacity(whole.len() + decimals);
    raw.push_str(whole);
    raw.push_str(fraction);
    raw.extend(std::iter::repeat_n('0', decimals - fraction.len()));

    let trimmed = raw.trim_start_matches('0');
    Ok(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
}

#[async_trait]
impl Tool for ToRawAmountTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> Result<Value, ToolExecutionError> {
        let err = |msg: String| ToolExecutionError::new("to_raw_amount", msg);
        let params: ToRawAmountParams =
            serde_json::from_value(params).map_err(|e| err(format!("Invalid parameters: {}", e)))?;

        let amount = match &params.amount {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => return Err(err(format!("Invalid amount: {}", other))),
        };

        let decimals = match (params.decimals, params.symbol.as_deref()) {
            (Some(d), _) => d,
            (None, Some(symbol)) => {
                let network = params
                    .network
                    .clone()
                    .unwrap_or_else(|| context.default_network().to_string());
                self.tokens
                    .lookup(symbol, &network)
                    .map(|t| t.decimals)
                    .ok_or_else(|| err(format!("Unknown token '{}' on {}", symbol, network)))?
            }
            (None, None) => return Err(err("Either 'decimals' or 'symbol' is required".to_string())),
        };

        let raw = to_raw_amount(&amount, decimals).map_err(err)?;
        Ok(json!({
            "message": format!("{} = {} raw units ({} decimals)", amount, raw, decimals),
            "raw_amount": raw,
            "decimals": decimals,
        }))
    }
}
