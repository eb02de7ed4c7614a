//! REST adapters for bar history and market listings.

use crate::domain::errors::{AppError, NetworkResult};
use crate::domain::logging::{LogComponent, get_logger};
use crate::domain::market_data::{
    BarQuery, BarSource, BarsResponse, MarketQuery, MarketSnapshotSource, MarketSummary, RawBar,
};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use gloo_net::http::{Request, Response};
use serde::de::DeserializeOwned;

const COMPONENT: LogComponent = LogComponent::Infrastructure("HttpClient");

/// `GET {base}/bars?symbol=..&interval=..&limit=..[&endTime=..]`
#[derive(Debug, Clone)]
pub struct HttpBarSource {
    base_url: String,
}

impl HttpBarSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    pub fn url_for(&self, query: &BarQuery) -> String {
        format!("{}/bars?{}", self.base_url, query.to_query_string())
    }
}

impl BarSource for HttpBarSource {
    fn fetch_bars<'a>(&'a self, query: &'a BarQuery) -> LocalBoxFuture<'a, NetworkResult<Vec<RawBar>>> {
        async move {
            let url = self.url_for(query);
            get_logger().info(
                COMPONENT,
                &format!("📡 Fetching {} bars for {}-{}", query.limit, query.symbol.value(), query.interval),
            );
            let body: BarsResponse = get_json(&url).await?;
            let bars = body.into_bars();
            get_logger().info(COMPONENT, &format!("✅ Received {} bars", bars.len()));
            Ok(bars)
        }
        .boxed_local()
    }
}

/// `GET {base}/markets?ids=..&per_page=..`
#[derive(Debug, Clone)]
pub struct HttpMarketSource {
    base_url: String,
}

impl HttpMarketSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    pub fn url_for(&self, query: &MarketQuery) -> String {
        format!("{}/markets?{}", self.base_url, query.to_query_string())
    }
}

impl MarketSnapshotSource for HttpMarketSource {
    fn fetch_markets<'a>(
        &'a self,
        query: &'a MarketQuery,
    ) -> LocalBoxFuture<'a, NetworkResult<Vec<MarketSummary>>> {
        async move { get_json(&self.url_for(query)).await }.boxed_local()
    }
}

async fn get_json<T: DeserializeOwned>(url: &str) -> NetworkResult<T> {
    let response = Request::get(url)
        .send()
        .await
        .map_err(|e| AppError::NetworkError(format!("Failed to send request: {e}")))?;
    check_status(&response)?;
    response
        .json::<T>()
        .await
        .map_err(|e| AppError::ParseError(format!("Failed to parse JSON: {e}")))
}

fn check_status(response: &Response) -> NetworkResult<()> {
    if response.ok() {
        return Ok(());
    }
    get_logger().warn(
        COMPONENT,
        &format!("❌ {} answered {} {}", response.url(), response.status(), response.status_text()),
    );
    Err(AppError::HttpStatus(response.status()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market_data::{Symbol, TimeInterval, Timestamp};

    #[test]
    fn bar_url_joins_base_without_double_slash() {
        let source = HttpBarSource::new("https://api.example.com/v1/");
        let query = BarQuery::new(Symbol::from("ethusdt"), TimeInterval::FifteenMinutes, 50)
            .before(Timestamp::from_secs(1_700_000_000));
        assert_eq!(
            source.url_for(&query),
            "https://api.example.com/v1/bars?symbol=ETHUSDT&interval=15m&limit=50&endTime=1700000000000"
        );
    }

    #[test]
    fn market_url_lists_ids() {
        let source = HttpMarketSource::new("/api");
        let query = MarketQuery { ids: vec!["bitcoin".into()], per_page: 1 };
        assert_eq!(source.url_for(&query), "/api/markets?ids=bitcoin&per_page=1");
    }
}
