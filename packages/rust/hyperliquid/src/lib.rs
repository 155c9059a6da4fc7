//! Source B: the Hyperliquid `info` endpoint.
//!
//! Two request types are used: `portfolio` for the account value history that
//! is compared against the snapshots, and `userNonFundingLedgerUpdates` for the
//! deposits, withdrawals and transfers that explain differences between them.

mod ledger;
mod portfolio;

use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use perpcheck_shared::{
    Address, HyperliquidConfig, PerpcheckError, Result, RetryPolicy, Snapshot, with_retries,
};

pub use ledger::{Flow, dedup_events, extract_flows, net_flow_between};
pub use portfolio::{parse_portfolio, points_in_window};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("perpcheck/", env!("CARGO_PKG_VERSION"));

/// Client for the `info` endpoint.
#[derive(Debug, Clone)]
pub struct InfoClient {
    client: Client,
    api_url: String,
    portfolio_window: String,
    page_size: usize,
    retry: RetryPolicy,
}

impl InfoClient {
    /// Create a client from the `[hyperliquid]` config.
    pub fn new(config: &HyperliquidConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PerpcheckError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            portfolio_window: config.portfolio_window.clone(),
            page_size: config.ledger_page_size.max(1),
            retry: RetryPolicy::new(config.max_attempts),
        })
    }

    /// Override the retry policy (tests use millisecond delays).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post_once(&self, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.api_url)
            .json(body)
            .send()
            .await
            .map_err(|e| PerpcheckError::Network(format!("{}: {e}", self.api_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PerpcheckError::Http {
                status: status.as_u16(),
                url: self.api_url.clone(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PerpcheckError::parse(format!("{}: invalid JSON body: {e}", self.api_url)))
    }

    async fn post(&self, label: &str, body: Value) -> Result<Value> {
        with_retries(label, self.retry, || self.post_once(&body)).await
    }

    /// Account value history of the configured portfolio window.
    ///
    /// A response without that window yields no points.
    #[instrument(skip_all, fields(%address))]
    pub async fn portfolio(&self, address: &Address) -> Result<Vec<Snapshot>> {
        let payload = self
            .post(
                "portfolio",
                json!({"type": "portfolio", "user": address.as_str()}),
            )
            .await?;

        let points = parse_portfolio(&payload, &self.portfolio_window)?.unwrap_or_default();
        debug!(points = points.len(), window = %self.portfolio_window, "portfolio fetched");
        Ok(points)
    }

    /// One page of ledger updates in `[start_ms, end_ms]`.
    ///
    /// Anything other than a list is an empty page.
    pub async fn ledger_page(
        &self,
        address: &Address,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Value>> {
        let payload = self
            .post(
                "ledger page",
                json!({
                    "type": "userNonFundingLedgerUpdates",
                    "user": address.as_str(),
                    "startTime": start_ms,
                    "endTime": end_ms,
                }),
            )
            .await?;

        Ok(match payload {
            Value::Array(events) => events,
            _ => Vec::new(),
        })
    }

    /// Every ledger update up to `end_ms`, deduplicated.
    ///
    /// Pagination starts at cursor 0 and moves to the latest `time` of each
    /// full page; an empty or short page ends it. `start_ms` only labels the
    /// span for logging, since the endpoint is queried from the beginning of
    /// the account's history.
    #[instrument(skip_all, fields(%address, start_ms = start_ms, end_ms = end_ms))]
    pub async fn all_ledger_events(
        &self,
        address: &Address,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Value>> {
        let mut events = Vec::new();
        let mut cursor = 0i64;
        let mut pages = 0usize;

        loop {
            let page = self.ledger_page(address, cursor, end_ms).await?;
            pages += 1;
            if page.is_empty() {
                break;
            }
            let full = page.len() >= self.page_size;
            let latest = page
                .iter()
                .filter_map(|e| e.get("time").and_then(Value::as_i64))
                .max();
            events.extend(page);

            match latest {
                Some(latest) if full => {
                    // a page full of events sharing one timestamp would repeat forever
                    cursor = if latest > cursor { latest } else { cursor + 1 };
                }
                _ => break,
            }
        }

        let total = events.len();
        let unique = dedup_events(events);
        debug!(pages, total, unique = unique.len(), "ledger fetched");
        Ok(unique)
    }
}
