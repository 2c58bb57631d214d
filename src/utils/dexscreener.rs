//! DexScreener API client
//!
//! Two endpoints are used:
//! - `GET /community-takeovers/latest/v1` returns the latest CTO events
//! - `GET /latest/dex/tokens/{address}` returns trading pairs for a token
//!
//! The upstream schema is treated as untrusted: every field is optional on
//! the wire and missing data never fails decoding. A record of the wrong
//! shape is dropped on its own without failing the rest of the list.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::utils::seen_store::identity_key;
use crate::utils::MetricsService;

/// External link attached to a CTO event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLink {
    #[serde(rename = "type", default)]
    pub link_type: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// One community takeover event as reported by DexScreener
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtoEvent {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub token_address: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub links: Vec<EventLink>,
    #[serde(default)]
    pub claim_date: Option<String>,
}

impl CtoEvent {
    /// Dedupe key, or `None` when chain or address is missing
    pub fn identity_key(&self) -> Option<String> {
        identity_key(self.chain_id.as_deref()?, self.token_address.as_deref()?)
    }

    /// Banner if present, otherwise the icon
    pub fn image(&self) -> Option<&str> {
        self.header
            .as_deref()
            .or(self.icon.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Decoded `latest` response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    pub events: Vec<CtoEvent>,
    /// Records that could not be decoded as an event
    pub malformed: usize,
}

impl EventBatch {
    /// Decode each record on its own; bad ones are counted and skipped.
    pub fn from_records(records: Vec<serde_json::Value>) -> Self {
        let mut batch = Self::default();
        for record in records {
            match serde_json::from_value::<CtoEvent>(record) {
                Ok(event) => batch.events.push(event),
                Err(e) => {
                    warn!(target: "DEXSCREENER", "Skipping malformed CTO record: {}", e);
                    batch.malformed += 1;
                }
            }
        }
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.malformed == 0
    }
}

impl From<Vec<CtoEvent>> for EventBatch {
    fn from(events: Vec<CtoEvent>) -> Self {
        Self {
            events,
            malformed: 0,
        }
    }
}

/// Rolling-window figures keyed by DexScreener's window names
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Windowed {
    #[serde(default)]
    pub m5: Option<f64>,
    #[serde(default)]
    pub h1: Option<f64>,
    #[serde(default)]
    pub h6: Option<f64>,
    #[serde(default)]
    pub h24: Option<f64>,
}

/// Trading details used to enrich a notification
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenDetails {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub market_cap: Option<f64>,
    /// Epoch milliseconds
    pub pair_created_at: Option<i64>,
    pub volume: Windowed,
    pub price_change: Windowed,
    pub banner_image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokensResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pairs: Vec<PairRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairRecord {
    #[serde(default)]
    chain_id: Option<String>,
    #[serde(default)]
    base_token: Option<BaseToken>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    fdv: Option<f64>,
    #[serde(default)]
    pair_created_at: Option<i64>,
    #[serde(default)]
    volume: Option<Windowed>,
    #[serde(default)]
    price_change: Option<Windowed>,
    #[serde(default)]
    info: Option<PairInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct BaseToken {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairInfo {
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    header: Option<String>,
}

impl From<PairRecord> for TokenDetails {
    fn from(pair: PairRecord) -> Self {
        let base = pair.base_token.unwrap_or_default();
        let info = pair.info.unwrap_or_default();
        Self {
            name: base.name,
            symbol: base.symbol,
            market_cap: pair.market_cap.or(pair.fdv),
            pair_created_at: pair.pair_created_at,
            volume: pair.volume.unwrap_or_default(),
            price_change: pair.price_change.unwrap_or_default(),
            banner_image: info.header.or(info.image_url),
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Pick the pair on the requested chain, else the first one.
fn select_pair(pairs: Vec<PairRecord>, chain: &str) -> Option<PairRecord> {
    let wanted = chain.trim().to_lowercase();
    let index = pairs
        .iter()
        .position(|p| {
            p.chain_id
                .as_deref()
                .is_some_and(|c| c.trim().to_lowercase() == wanted)
        })
        .unwrap_or(0);
    pairs.into_iter().nth(index)
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid base url {0:?}")]
    BaseUrl(String),
}

/// Where CTO events and token details come from
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Latest CTO events. Callers treat an error like an empty list.
    async fn fetch_latest_events(&self) -> Result<EventBatch, SourceError>;

    /// Best-effort details for one token; `None` on any failure.
    async fn fetch_details(&self, chain: &str, token_address: &str) -> Option<TokenDetails>;
}

/// HTTP client for the public DexScreener API
pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: Url,
    details_delay: Duration,
    metrics: Option<Arc<MetricsService>>,
}

impl DexScreenerClient {
    /// Create a client with a bounded per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        details_delay: Duration,
    ) -> Result<Self, SourceError> {
        let raw = base_url.into();
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| SourceError::BaseUrl(raw.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ctowatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            details_delay,
            metrics: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        Self::new(
            config.api_base_url.clone(),
            config.request_timeout,
            config.details_delay,
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsService>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Base URL with `segments` appended, each one percent-encoded
    fn endpoint_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        url: Url,
    ) -> Result<T, SourceError> {
        let started = Instant::now();
        let result = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status(status));
            }
            let body = response.bytes().await?;
            Ok::<T, SourceError>(serde_json::from_slice(&body)?)
        }
        .await;

        if let Some(metrics) = &self.metrics {
            metrics.observe_upstream(endpoint, started);
        }
        result
    }

    async fn request_details(
        &self,
        chain: &str,
        token_address: &str,
    ) -> Result<Option<TokenDetails>, SourceError> {
        let url = self.endpoint_url(["latest", "dex", "tokens", token_address.trim()]);
        let response: TokensResponse = self.get_json("token_details", url).await?;
        Ok(select_pair(response.pairs, chain).map(TokenDetails::from))
    }
}

#[async_trait]
impl DataSource for DexScreenerClient {
    async fn fetch_latest_events(&self) -> Result<EventBatch, SourceError> {
        let url = self.endpoint_url(["community-takeovers", "latest", "v1"]);
        let records: Vec<serde_json::Value> = self.get_json("latest_events", url).await?;
        let batch = EventBatch::from_records(records);
        debug!(
            target: "DEXSCREENER",
            "Fetched {} CTO events ({} malformed)",
            batch.events.len(),
            batch.malformed
        );
        Ok(batch)
    }

    async fn fetch_details(&self, chain: &str, token_address: &str) -> Option<TokenDetails> {
        // Upstream rate limit
        tokio::time::sleep(self.details_delay).await;

        match self.request_details(chain, token_address).await {
            Ok(Some(details)) => Some(details),
            Ok(None) => {
                debug!(target: "DEXSCREENER", "No pairs for {}:{}", chain, token_address);
                None
            }
            Err(e) => {
                warn!(target: "DEXSCREENER", "Details for {}:{} unavailable: {}", chain, token_address, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> DexScreenerClient {
        DexScreenerClient::new(base, Duration::from_millis(300), Duration::from_millis(50)).unwrap()
    }

    #[test]
    fn event_tolerates_nulls_and_missing_fields() {
        let raw = json!([
            {"chainId": "solana", "tokenAddress": "Abc", "links": null, "icon": null},
            {"url": "https://dexscreener.com/x"},
            {"chainId": "bsc", "tokenAddress": "0xDEAD", "links": [{"type": "twitter", "url": "https://x.com/t"}, {"label": "Website"}]}
        ]);
        let events: Vec<CtoEvent> = serde_json::from_value(raw).unwrap();

        assert_eq!(events[0].identity_key().as_deref(), Some("solana-abc"));
        assert!(events[0].links.is_empty());
        assert_eq!(events[1].identity_key(), None);
        assert_eq!(events[2].identity_key().as_deref(), Some("bsc-0xdead"));
        assert_eq!(events[2].links[0].link_type.as_deref(), Some("twitter"));
        assert_eq!(events[2].links[1].url, None);
    }

    #[test]
    fn pair_selection_prefers_matching_chain() {
        let pairs: Vec<PairRecord> = serde_json::from_value(json!([
            {"chainId": "ethereum", "baseToken": {"name": "Eth Wrapped", "symbol": "EW"}},
            {"chainId": "Solana", "baseToken": {"name": "Sol Token", "symbol": "ST"}, "marketCap": 1200.5}
        ]))
        .unwrap();
        let pick = TokenDetails::from(select_pair(pairs, "solana").unwrap());
        assert_eq!(pick.symbol.as_deref(), Some("ST"));
        assert_eq!(pick.market_cap, Some(1200.5));
    }

    #[test]
    fn pair_selection_falls_back_to_first() {
        let pairs: Vec<PairRecord> = serde_json::from_value(json!([
            {"chainId": "ethereum", "baseToken": {"symbol": "FIRST"}, "fdv": 10.0},
            {"chainId": "base", "baseToken": {"symbol": "SECOND"}}
        ]))
        .unwrap();
        let pick = TokenDetails::from(select_pair(pairs, "solana").unwrap());
        assert_eq!(pick.symbol.as_deref(), Some("FIRST"));
        assert_eq!(pick.market_cap, Some(10.0));

        assert!(select_pair(Vec::new(), "solana").is_none());
    }

    #[tokio::test]
    async fn fetches_latest_events() {
        let base = serve(Router::new().route(
            "/community-takeovers/latest/v1",
            get(|| async {
                Json(json!([{"chainId": "solana", "tokenAddress": "Abc123", "claimDate": "2024-05-01T10:00:00.000Z"}]))
            }),
        ))
        .await;

        let events = client(&base).fetch_latest_events().await.unwrap().events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].claim_date.as_deref(), Some("2024-05-01T10:00:00.000Z"));
    }

    #[tokio::test]
    async fn malformed_record_does_not_hide_its_neighbours() {
        let base = serve(Router::new().route(
            "/community-takeovers/latest/v1",
            get(|| async {
                Json(json!([
                    {"chainId": "solana", "tokenAddress": "GoodOne"},
                    {"chainId": "solana", "tokenAddress": 12345},
                    {"chainId": "bsc", "tokenAddress": "0xBEEF", "links": "x"},
                    "not an object"
                ]))
            }),
        ))
        .await;

        let batch = client(&base).fetch_latest_events().await.unwrap();
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].identity_key().as_deref(), Some("solana-goodone"));
        assert_eq!(batch.malformed, 3);
    }

    #[tokio::test]
    async fn base_url_path_is_kept() {
        let base = serve(Router::new().route(
            "/api/community-takeovers/latest/v1",
            get(|| async { Json(json!([{"chainId": "solana", "tokenAddress": "Abc"}])) }),
        ))
        .await;

        let batch = client(&format!("{}/api/", base)).fetch_latest_events().await.unwrap();
        assert_eq!(batch.events.len(), 1);
    }

    #[test]
    fn rejects_unusable_base_url() {
        let err = DexScreenerClient::new("not a url", Duration::from_secs(1), Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::BaseUrl(_)));
    }

    #[tokio::test]
    async fn token_address_stays_one_path_segment() {
        let base = serve(Router::new().route(
            "/latest/dex/tokens/:address",
            get(|Path(address): Path<String>| async move {
                Json(json!({"pairs": [{"chainId": "solana", "baseToken": {"name": address}}]}))
            }),
        ))
        .await;

        let details = client(&base).fetch_details("solana", "a/b?c#d").await.unwrap();
        assert_eq!(details.name.as_deref(), Some("a/b?c#d"));
    }

    #[tokio::test]
    async fn latest_events_errors_are_classified() {
        let base = serve(
            Router::new()
                .route(
                    "/community-takeovers/latest/v1",
                    get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
                ),
        )
        .await;
        let err = client(&base).fetch_latest_events().await.unwrap_err();
        assert!(matches!(err, SourceError::Status(s) if s.as_u16() == 502));

        let base = serve(Router::new().route(
            "/community-takeovers/latest/v1",
            get(|| async { "<html>oops</html>" }),
        ))
        .await;
        let err = client(&base).fetch_latest_events().await.unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }

    #[tokio::test]
    async fn details_wait_for_the_rate_limit_delay() {
        let base = serve(Router::new().route(
            "/latest/dex/tokens/:address",
            get(|Path(address): Path<String>| async move {
                Json(json!({"pairs": [{
                    "chainId": "solana",
                    "baseToken": {"name": "Takeover", "symbol": "CTO"},
                    "marketCap": 52000.0,
                    "pairCreatedAt": 1714557600000i64,
                    "volume": {"m5": 10.0, "h1": 100.0, "h6": null, "h24": 2500.0},
                    "priceChange": {"m5": -1.5, "h1": 3.2},
                    "info": {"imageUrl": "https://img/icon.png", "header": "https://img/banner.png"},
                    "address": address
                }]}))
            }),
        ))
        .await;

        let started = Instant::now();
        let details = client(&base).fetch_details("Solana", "Abc123").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));

        assert_eq!(details.name.as_deref(), Some("Takeover"));
        assert_eq!(details.pair_created_at, Some(1714557600000));
        assert_eq!(details.volume.h6, None);
        assert_eq!(details.price_change.m5, Some(-1.5));
        assert_eq!(details.banner_image.as_deref(), Some("https://img/banner.png"));
    }

    #[tokio::test]
    async fn details_timeout_yields_none() {
        let base = serve(Router::new().route(
            "/latest/dex/tokens/:address",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"pairs": []}))
            }),
        ))
        .await;

        let started = Instant::now();
        assert!(client(&base).fetch_details("solana", "Abc123").await.is_none());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn details_without_pairs_yield_none() {
        let base = serve(Router::new().route(
            "/latest/dex/tokens/:address",
            get(|| async { Json(json!({"schemaVersion": "1.0.0", "pairs": null})) }),
        ))
        .await;
        assert!(client(&base).fetch_details("solana", "Abc123").await.is_none());
    }
}
