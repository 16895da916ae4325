//! Zerodha Kite historical candle source

use super::{CandleData, CandleSource};
use crate::config::ZerodhaConfig;
use crate::error::{AppError, Result};
use crate::throttle::RateLimiter;
use crate::timeframe::{self, Timeframe, MARKET_TZ};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;

const BASE_URL: &str = "https://api.kite.trade";

/// Kite rejects historical ranges longer than this
const MAX_DAYS_PER_REQUEST: i64 = 2000;

const KITE_TS_FMT: &str = "%Y-%m-%dT%H:%M:%S%z";
const KITE_PARAM_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Deserialize)]
struct KiteResponse<T> {
    status: String,
    data: Option<T>,
    message: Option<String>,
    error_type: Option<String>,
}

#[derive(Deserialize)]
struct HistoricalData {
    candles: Vec<Vec<serde_json::Value>>,
}

/// Zerodha Kite candle source
pub struct ZerodhaCandleSource {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: String,
    instruments: HashMap<String, u64>,
    limiter: RateLimiter,
}

impl ZerodhaCandleSource {
    pub fn new(config: &ZerodhaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
            instruments: config.instruments.clone(),
            limiter: RateLimiter::new(config.requests_per_second),
        })
    }

    fn get_headers(&self) -> Result<HeaderMap> {
        if self.api_key.is_empty() || self.access_token.is_empty() {
            return Err(AppError::Auth("Kite api_key/access_token not configured".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert("X-Kite-Version", HeaderValue::from_static("3"));
        let auth = HeaderValue::from_str(&format!("token {}:{}", self.api_key, self.access_token))
            .map_err(|e| AppError::Auth(format!("Invalid Kite credentials: {}", e)))?;
        headers.insert("Authorization", auth);
        Ok(headers)
    }

    fn instrument_token(&self, symbol: &str) -> Result<u64> {
        self.instruments
            .get(symbol)
            .copied()
            .ok_or_else(|| AppError::Config(format!("No Kite instrument token for {}", symbol)))
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.limiter.acquire().await;

        let response = self
            .client
            .get(url)
            .headers(self.get_headers()?)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body: KiteResponse<T> = response.json().await?;

        if status == StatusCode::FORBIDDEN || body.error_type.as_deref() == Some("TokenException") {
            return Err(AppError::Auth(
                body.message.unwrap_or_else(|| "Kite session expired".to_string()),
            ));
        }
        if body.status != "success" {
            return Err(AppError::Provider(format!(
                "Kite {} ({}): {}",
                body.error_type.unwrap_or_else(|| "error".to_string()),
                status,
                body.message.unwrap_or_default()
            )));
        }

        body.data
            .ok_or_else(|| AppError::Provider("No data in Kite response".to_string()))
    }
}

/// Parse one `[ts, open, high, low, close, volume, ...]` array
fn parse_candle(raw: &[serde_json::Value]) -> Result<CandleData> {
    let bad = || AppError::Provider(format!("Malformed Kite candle: {:?}", raw));

    if raw.len() < 6 {
        return Err(bad());
    }
    let ts = raw[0].as_str().ok_or_else(bad)?;
    let timestamp = DateTime::parse_from_str(ts, KITE_TS_FMT)
        .map_err(|_| bad())?
        .with_timezone(&Utc);
    let num = |i: usize| raw[i].as_f64().ok_or_else(bad);

    Ok(CandleData {
        timestamp,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)? as i64,
    })
}

#[async_trait]
impl CandleSource for ZerodhaCandleSource {
    fn id(&self) -> &'static str {
        "zerodha"
    }

    async fn login(&self) -> Result<()> {
        #[derive(Deserialize)]
        struct Profile {
            user_id: String,
        }

        let profile: Profile = self
            .get(&format!("{}/user/profile", self.base_url), &[])
            .await?;
        tracing::info!("Kite session valid for {}", profile.user_id);
        Ok(())
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CandleData>> {
        let token = self.instrument_token(symbol)?;
        let url = format!(
            "{}/instruments/historical/{}/{}",
            self.base_url,
            token,
            timeframe.kite_interval()
        );

        let from = timeframe::align_down(start, timeframe);
        let mut candles = Vec::new();
        let mut chunk_start = from;

        while chunk_start < end {
            let chunk_end = (chunk_start + Duration::days(MAX_DAYS_PER_REQUEST)).min(end);
            // Kite's `to` is inclusive
            let to = chunk_end - Duration::seconds(1);

            let query = [
                (
                    "from",
                    chunk_start.with_timezone(&MARKET_TZ).format(KITE_PARAM_FMT).to_string(),
                ),
                ("to", to.with_timezone(&MARKET_TZ).format(KITE_PARAM_FMT).to_string()),
            ];

            let data: HistoricalData = self.get(&url, &query).await.map_err(|e| {
                tracing::error!(
                    "Kite historical failure: {} {} {} -> {}: {}",
                    symbol,
                    timeframe,
                    chunk_start,
                    chunk_end,
                    e
                );
                e
            })?;

            for raw in &data.candles {
                let candle = parse_candle(raw)?;
                if candle.timestamp >= from && candle.timestamp < end {
                    candles.push(candle);
                }
            }

            chunk_start = chunk_end;
        }

        tracing::debug!("Kite returned {} {} {} candles", candles.len(), symbol, timeframe);
        Ok(candles)
    }
}
