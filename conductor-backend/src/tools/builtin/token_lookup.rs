//! Token Lookup tool for resolving token symbols to addresses
//!
//! Token data is loaded from config/tokens.ron at startup and handed to the
//! tool, so agents never have to guess contract addresses for common tokens.

use crate::error::{ConfigError, ToolExecutionError};
use crate::tools::registry::Tool;
use crate::tools::types::{PropertySchema, ToolCategory, ToolContext, ToolDefinition, ToolInputSchema};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Token info loaded from config
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    pub decimals: u8,
    pub name: String,
}

/// network -> SYMBOL -> token
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    networks: HashMap<String, HashMap<String, TokenInfo>>,
}

impl TokenTable {
    /// Load `tokens.ron` from the given path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_ron_str(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })?;

        log::info!(
            "[tokens] Loaded {} tokens across {} networks from {:?}",
            table.len(),
            table.networks.len(),
            path
        );
        Ok(table)
    }

    pub fn from_ron_str(content: &str) -> Result<Self, String> {
        let raw: HashMap<String, HashMap<String, TokenInfo>> =
            ron::from_str(content).map_err(|e| e.to_string())?;

        // Symbols are matched case-insensitively
        let networks = raw
            .into_iter()
            .map(|(network, tokens)| {
                let tokens = tokens
                    .into_iter()
                    .map(|(symbol, info)| (symbol.to_uppercase(), info))
                    .collect();
                (network.to_lowercase(), tokens)
            })
            .collect();

        Ok(Self { networks })
    }

    /// Look up a symbol on a network, falling back to `base` for unknown networks
    pub fn lookup(&self, symbol: &str, network: &str) -> Option<&TokenInfo> {
        self.network_tokens(network)?.get(&symbol.to_uppercase())
    }

    pub fn list_available(&self, network: &str) -> Vec<String> {
        self.network_tokens(network)
            .map(|tokens| {
                let mut symbols: Vec<String> = tokens.keys().cloned().collect();
                symbols.sort();
                symbols
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.networks.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn network_tokens(&self, network: &str) -> Option<&HashMap<String, TokenInfo>> {
        self.networks
            .get(&network.to_lowercase())
            .or_else(|| self.networks.get("base"))
    }
}

/// Token Lookup tool
pub struct TokenLookupTool {
    definition: ToolDefinition,
    tokens: Arc<TokenTable>,
}

impl TokenLookupTool {
    pub fn new(tokens: Arc<TokenTable>) -> Self {
        let mut properties = HashMap::new();

        properties.insert(
            "symbol".to_string(),
            PropertySchema::string("Token symbol (e.g., 'ETH', 'USDC', 'WETH'). Case-insensitive."),
        );
        properties.insert(
            "network".to_string(),
            PropertySchema::string("Network: 'base' or 'mainnet'. Defaults to the wallet's chain.")
                .with_enum(&["base", "mainnet"]),
        );

        TokenLookupTool {
            definition: ToolDefinition {
                name: "token_lookup".to_string(),
                description: "Look up a token's contract address and decimals by symbol.".to_string(),
                input_schema: ToolInputSchema {
                    schema_type: "object".to_string(),
                    properties,
                    required: vec!["symbol".to_string()],
                },
                category: ToolCategory::Market,
            },
            tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenLookupParams {
    symbol: String,
    #[serde(default)]
    network: Option<String>,
}

#[async_trait]
impl Tool for TokenLookupTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> Result<Value, ToolExecutionError> {
        let params: TokenLookupParams = serde_json::from_value(params)
            .map_err(|e| ToolExecutionError::new("token_lookup", format!("Invalid parameters: {}", e)))?;
        let network = params
            .network
            .unwrap_or_else(|| context.default_network().to_string());
        let symbol = params.symbol.to_uppercase();

        match self.tokens.lookup(&symbol, &network) {
            Some(token) => {
                log::info!("[token_lookup] {} on {} -> {}", symbol, network, token.address);
                Ok(json!({
                    "message": format!("{} ({}) on {}\nAddress: {}", token.name, symbol, network, token.address),
                    "symbol": symbol,
                    "network": network,
                    "address": token.address,
                    "decimals": token.decimals,
                    "name": token.name,
                }))
            }
            None => {
                let available = self.tokens.list_available(&network);
                Err(ToolExecutionError::new(
                    "token_lookup",
                    format!(
                        "Token '{}' not found on {}. Available tokens: {}",
                        symbol,
                        network,
                        available.join(", ")
                    ),
                ))
            }
        }
    }
}
