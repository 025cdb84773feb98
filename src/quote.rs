// src/quote.rs
use std::str::FromStr;
use std::sync::Arc;

use log::{info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::QuoteError;

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub name: String,
    pub price: Decimal,
    pub symbol: String,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

/// Price lookups against Alpha Vantage. Cheap to clone; clones share one
/// connection pool.
#[derive(Clone)]
pub struct QuoteClient {
    client: Client,
    base_url: Arc<String>,
    api_key: Arc<String>,
}

impl QuoteClient {
    pub fn new_with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: Arc::new(base_url.trim_end_matches('/').to_string()),
            api_key: Arc::new(api_key.into()),
        }
    }

    /// Current quote for `symbol`, or `None` when the provider does not know
    /// it. Only transport failures are errors.
    pub async fn lookup(&self, symbol: &str) -> Result<Option<Quote>, QuoteError> {
        let Some((symbol, price)) = self.global_quote(symbol).await? else {
            return Ok(None);
        };
        let name = self.company_name(&symbol).await;
        Ok(Some(Quote {
            name,
            price,
            symbol,
        }))
    }

    /// Like `lookup` but without the company name, so one provider call.
    pub async fn price(&self, symbol: &str) -> Result<Option<Decimal>, QuoteError> {
        Ok(self.global_quote(symbol).await?.map(|(_, price)| price))
    }

    // Canonical symbol and price from GLOBAL_QUOTE.
    async fn global_quote(&self, symbol: &str) -> Result<Option<(String, Decimal)>, QuoteError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .get(self.query_url())
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(
                "Quote provider returned HTTP {} for {}",
                response.status(),
                symbol
            );
            return Ok(None);
        }

        let body = match response.json::<GlobalQuoteResponse>().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to parse quote for {}: {}", symbol, e);
                return Ok(None);
            }
        };

        if let Some(message) = body.note.or(body.information) {
            warn!("Quote provider refused lookup of {}: {}", symbol, message);
        }

        let Some(quote) = body.global_quote else {
            return Ok(None);
        };
        let (Some(canonical), Some(price)) = (quote.symbol, quote.price) else {
            info!("Unknown symbol {}", symbol);
            return Ok(None);
        };
        let price = match Decimal::from_str(price.trim()) {
            Ok(price) if price > Decimal::ZERO => price,
            _ => {
                warn!("Unusable price {:?} for {}", price, canonical);
                return Ok(None);
            }
        };

        Ok(Some((canonical, price)))
    }

    // The quote endpoint has no company name; take it from symbol search and
    // fall back to the ticker when search has nothing.
    async fn company_name(&self, symbol: &str) -> String {
        let request = self.client.get(self.query_url()).query(&[
            ("function", "SYMBOL_SEARCH"),
            ("keywords", symbol),
            ("apikey", self.api_key.as_str()),
        ]);

        let matches = match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<SymbolSearchResponse>().await {
                    Ok(search) => search.best_matches,
                    Err(e) => {
                        warn!("Failed to parse symbol search for {}: {}", symbol, e);
                        Vec::new()
                    }
                }
            }
            Ok(response) => {
                warn!(
                    "Symbol search returned HTTP {} for {}",
                    response.status(),
                    symbol
                );
                Vec::new()
            }
            Err(e) => {
                warn!("Symbol search failed for {}: {}", symbol, e);
                Vec::new()
            }
        };

        matches
            .into_iter()
            .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
            .map(|m| m.name)
            .unwrap_or_else(|| symbol.to_string())
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.base_url)
    }
}
