use super::live::MarketSummary;
use super::value_objects::{Symbol, TimeInterval, Timestamp};
use crate::domain::errors::NetworkResult;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

/// Numeric field that the API may send as a JSON number or as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberLike {
    Number(f64),
    Text(String),
}

impl NumberLike {
    /// Coerce to a finite `f64`; unparseable or non-finite values give `None`.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            NumberLike::Number(n) => *n,
            NumberLike::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for NumberLike {
    fn from(value: f64) -> Self {
        NumberLike::Number(value)
    }
}

impl From<&str> for NumberLike {
    fn from(value: &str) -> Self {
        NumberLike::Text(value.to_string())
    }
}

/// One bar exactly as the REST endpoint returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    #[serde(alias = "openTime", alias = "time", alias = "t")]
    pub timestamp: NumberLike,
    #[serde(alias = "o")]
    pub open: NumberLike,
    #[serde(alias = "h")]
    pub high: NumberLike,
    #[serde(alias = "l")]
    pub low: NumberLike,
    #[serde(alias = "c")]
    pub close: NumberLike,
    #[serde(alias = "v", default = "zero_volume")]
    pub volume: NumberLike,
}

fn zero_volume() -> NumberLike {
    NumberLike::Number(0.0)
}

impl RawBar {
    pub fn new(
        timestamp: impl Into<NumberLike>,
        open: impl Into<NumberLike>,
        high: impl Into<NumberLike>,
        low: impl Into<NumberLike>,
        close: impl Into<NumberLike>,
        volume: impl Into<NumberLike>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            open: open.into(),
            high: high.into(),
            low: low.into(),
            close: close.into(),
            volume: volume.into(),
        }
    }
}

/// `GET /bars` body. Some deployments return the bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BarsResponse {
    Wrapped { bars: Vec<RawBar> },
    Bare(Vec<RawBar>),
}

impl BarsResponse {
    pub fn into_bars(self) -> Vec<RawBar> {
        match self {
            BarsResponse::Wrapped { bars } | BarsResponse::Bare(bars) => bars,
        }
    }
}

/// Parameters of one history request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BarQuery {
    pub symbol: Symbol,
    pub interval: TimeInterval,
    pub limit: u32,
    /// Only bars opening before this time (backfill).
    pub end_time: Option<Timestamp>,
}

impl BarQuery {
    pub fn new(symbol: Symbol, interval: TimeInterval, limit: u32) -> Self {
        Self { symbol, interval, limit, end_time: None }
    }

    pub fn before(mut self, end_time: Timestamp) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Query string for `GET /bars`.
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "symbol={}&interval={}&limit={}",
            self.symbol.value(),
            self.interval.as_query_str(),
            self.limit
        );
        if let Some(end) = self.end_time {
            query.push_str(&format!("&endTime={}", end.as_millis()));
        }
        query
    }
}

/// Source of historical bars (REST in the browser, fixtures in tests).
pub trait BarSource {
    fn fetch_bars<'a>(&'a self, query: &'a BarQuery) -> LocalBoxFuture<'a, NetworkResult<Vec<RawBar>>>;
}

/// Parameters of a `/markets` listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketQuery {
    pub ids: Vec<String>,
    pub per_page: u32,
}

impl MarketQuery {
    pub fn to_query_string(&self) -> String {
        format!("ids={}&per_page={}", self.ids.join(","), self.per_page)
    }
}

/// Source of market listing snapshots.
pub trait MarketSnapshotSource {
    fn fetch_markets<'a>(
        &'a self,
        query: &'a MarketQuery,
    ) -> LocalBoxFuture<'a, NetworkResult<Vec<MarketSummary>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bars_accept_strings_and_alternate_time_keys() {
        let body = r#"{"bars":[{"openTime":1700000000000,"open":"1.5","high":2,"low":"1","close":"1.75","volume":"10"}]}"#;
        let bars = serde_json::from_str::<BarsResponse>(body).map(BarsResponse::into_bars);
        let bars = bars.expect("wrapped body parses");
        assert_eq!(bars[0].open.as_f64(), Some(1.5));
        assert_eq!(bars[0].timestamp.as_f64(), Some(1_700_000_000_000.0));

        let bare = r#"[{"time":1,"open":1,"high":1,"low":1,"close":1}]"#;
        let bars = serde_json::from_str::<BarsResponse>(bare).map(BarsResponse::into_bars);
        assert_eq!(bars.expect("bare array parses")[0].volume.as_f64(), Some(0.0));
    }

    #[test]
    fn number_like_rejects_garbage() {
        assert_eq!(NumberLike::from("abc").as_f64(), None);
        assert_eq!(NumberLike::from(f64::INFINITY).as_f64(), None);
    }

    #[test]
    fn query_strings_follow_endpoint_contract() {
        let query = BarQuery::new(Symbol::from("btcusdt"), TimeInterval::OneHour, 200)
            .before(Timestamp::from_secs(1_700_000_000));
        assert_eq!(
            query.to_query_string(),
            "symbol=BTCUSDT&interval=1h&limit=200&endTime=1700000000000"
        );
        let markets = MarketQuery { ids: vec!["bitcoin".into(), "ethereum".into()], per_page: 2 };
        assert_eq!(markets.to_query_string(), "ids=bitcoin,ethereum&per_page=2");
    }
}
