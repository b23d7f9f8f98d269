//! Upstox v3 candle API client
//!
//! Requests are retried on connection failures and on 429/500/502/503/504
//! with exponential backoff. A `Retry-After` header on 429 replaces the
//! computed wait, capped by `max_backoff_ms`.

use super::{CandleProvider, HistoricalWindow, ProviderResponse, RawCandle, TransportError};
use crate::config::{ProviderConfig, RetryConfig};
use crate::database::enums::Timeframe;
use chrono::DateTime;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

/// HTTP client for the Upstox historical and intraday candle endpoints
pub struct UpstoxClient {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
    retry: RetryConfig,
}

impl UpstoxClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            retry: config.retry.clone(),
        })
    }

    fn historical_url(&self, instrument_key: &str, timeframe: Timeframe, window: &HistoricalWindow) -> String {
        let (unit, interval) = timeframe.provider_interval();
        format!(
            "{}/v3/historical-candle/{}/{}/{}/{}/{}",
            self.base_url,
            encode_key(instrument_key),
            unit,
            interval,
            HistoricalWindow::format_date(window.to),
            HistoricalWindow::format_date(window.from),
        )
    }

    fn intraday_url(&self, instrument_key: &str, timeframe: Timeframe) -> String {
        let (unit, interval) = timeframe.provider_interval();
        format!(
            "{}/v3/historical-candle/intraday/{}/{}/{}",
            self.base_url,
            encode_key(instrument_key),
            unit,
            interval,
        )
    }

    /// GET with retry, returning the typed response of the final attempt
    async fn get_with_retry(&self, url: &str) -> Result<ProviderResponse, TransportError> {
        let attempts = self.retry.max_retries + 1;
        let mut last_error = String::from("no attempt made");
        let mut server_wait: Option<Duration> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = server_wait.take().unwrap_or_else(|| self.retry.delay_for(attempt));
                tracing::debug!("Retrying {} in {:?} (attempt {}/{})", url, delay, attempt + 1, attempts);
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.get(url).header(ACCEPT, "application/json");
            if let Some(token) = &self.access_token {
                request = request.bearer_auth(token);
            }

            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_builder() => return Err(TransportError::Client(e.to_string())),
                Err(e) => {
                    tracing::warn!("Request to {} failed: {}", url, e);
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = resp.status();
            if self.retry.is_retriable_status(status.as_u16()) {
                if status == StatusCode::TOO_MANY_REQUESTS {
                    server_wait = retry_after(resp.headers())
                        .map(|wait| wait.min(Duration::from_millis(self.retry.max_backoff_ms)));
                }
                tracing::warn!("⚠️  {} returned HTTP {}", url, status);
                last_error = format!("HTTP {}", status);
                continue;
            }

            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    last_error = format!("failed to read body: {}", e);
                    continue;
                }
            };

            if !status.is_success() {
                return Ok(ProviderResponse::ProviderError(format!(
                    "HTTP {}: {}",
                    status,
                    error_summary(&body)
                )));
            }

            return Ok(parse_body(&body));
        }

        Err(TransportError::RetriesExhausted {
            attempts,
            message: last_error,
        })
    }
}

#[async_trait::async_trait]
impl CandleProvider for UpstoxClient {
    async fn fetch_historical(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
        window: &HistoricalWindow,
    ) -> Result<ProviderResponse, TransportError> {
        let url = self.historical_url(instrument_key, timeframe, window);
        self.get_with_retry(&url).await
    }

    async fn fetch_intraday(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
    ) -> Result<ProviderResponse, TransportError> {
        let url = self.intraday_url(instrument_key, timeframe);
        self.get_with_retry(&url).await
    }
}

/// Instrument keys carry a `|` separator that must be escaped in the path
fn encode_key(instrument_key: &str) -> String {
    instrument_key.replace('|', "%7C")
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Best-effort error text from an error envelope, falling back to the raw body
fn error_summary(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.chars().take(200).collect();
    };

    value
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| {
                    let code = e.get("errorCode").and_then(Value::as_str).unwrap_or("?");
                    let message = e.get("message").and_then(Value::as_str).unwrap_or("");
                    format!("{} {}", code, message)
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_else(|| value.to_string())
}

/// Parse `{"status": "success", "data": {"candles": [[ts, o, h, l, c, v, oi], ...]}}`
pub(crate) fn parse_body(body: &str) -> ProviderResponse {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => return ProviderResponse::MalformedResponse(format!("invalid JSON: {}", e)),
    };

    match value.get("status").and_then(Value::as_str) {
        Some("success") => {}
        Some(other) => {
            return ProviderResponse::ProviderError(format!("status={} {}", other, error_summary(body)))
        }
        None => return ProviderResponse::MalformedResponse("missing status".to_string()),
    }

    let Some(rows) = value
        .get("data")
        .and_then(|data| data.get("candles"))
        .and_then(Value::as_array)
    else {
        return ProviderResponse::MalformedResponse("missing data.candles".to_string());
    };

    let mut candles = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        match parse_row(row) {
            Ok(candle) => candles.push(candle),
            Err(reason) => {
                return ProviderResponse::MalformedResponse(format!("candle {}: {}", i, reason))
            }
        }
    }

    ProviderResponse::Success(candles)
}

fn parse_row(row: &Value) -> Result<RawCandle, String> {
    let fields = row.as_array().ok_or("not an array")?;
    if fields.len() < 6 {
        return Err(format!("expected at least 6 fields, got {}", fields.len()));
    }

    let timestamp = fields[0].as_str().ok_or("timestamp is not a string")?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| format!("invalid timestamp {:?}: {}", timestamp, e))?;

    Ok(RawCandle {
        timestamp,
        open: decimal_field(&fields[1], "open")?,
        high: decimal_field(&fields[2], "high")?,
        low: decimal_field(&fields[3], "low")?,
        close: decimal_field(&fields[4], "close")?,
        volume: integer_field(&fields[5], "volume")?,
        oi: fields.get(6).map(|v| integer_field(v, "oi")).transpose()?.unwrap_or(0),
    })
}

fn decimal_field(value: &Value, name: &str) -> Result<Decimal, String> {
    let Value::Number(number) = value else {
        return Err(format!("{} is not a number", name));
    };

    // Go through the textual form to avoid binary float rounding
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| format!("{} {}: {}", name, text, e))
}

/// Volume and open interest: whole and non-negative
fn integer_field(value: &Value, name: &str) -> Result<i64, String> {
    let n = match (value.as_i64(), value.as_f64()) {
        (Some(n), _) => n,
        (None, Some(f)) if f.fract() == 0.0 && f.abs() <= i64::MAX as f64 => f as i64,
        _ => return Err(format!("{} is not an integer: {}", name, value)),
    };
    if n < 0 {
        return Err(format!("{} is negative: {}", name, n));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SUCCESS_BODY: &str = r#"{
        "status": "success",
        "data": {
            "candles": [
                ["2025-06-06T09:30:00+05:30", 2958.4, 2962.0, 2955.1, 2960.75, 84210, 0],
                ["2025-06-06T09:15:00+05:30", 2950.1, 2961, 2948.55, 2958.4, 125000, 0]
            ]
        }
    }"#;

    fn test_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            base_url,
            access_token: Some("test-token".to_string()),
            timeout_secs: 5,
            retry: RetryConfig {
                max_retries: 3,
                backoff_ms: 1,
                max_backoff_ms: 10,
                ..RetryConfig::default()
            },
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_success() {
        let ProviderResponse::Success(candles) = parse_body(SUCCESS_BODY) else {
            panic!("expected success");
        };

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, dec!(2960.75));
        assert_eq!(candles[1].open, dec!(2950.1));
        assert_eq!(candles[1].high, dec!(2961));
        assert_eq!(candles[1].volume, 125_000);
        assert_eq!(candles[1].timestamp.offset().local_minus_utc(), 330 * 60);
    }

    #[test]
    fn test_parse_provider_error() {
        let body = r#"{"status":"error","errors":[{"errorCode":"UDAPI100011","message":"Invalid Instrument key"}]}"#;
        let ProviderResponse::ProviderError(message) = parse_body(body) else {
            panic!("expected provider error");
        };
        assert!(message.contains("UDAPI100011"));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_body("<html>"), ProviderResponse::MalformedResponse(_)));
        assert!(matches!(
            parse_body(r#"{"status":"success","data":{}}"#),
            ProviderResponse::MalformedResponse(_)
        ));
        assert!(matches!(
            parse_body(r#"{"status":"success","data":{"candles":[["not-a-date",1,2,3,4,5,0]]}}"#),
            ProviderResponse::MalformedResponse(_)
        ));
        assert!(matches!(
            parse_body(r#"{"status":"success","data":{"candles":[["2025-06-06T09:15:00+05:30","1",2,3,4,5]]}}"#),
            ProviderResponse::MalformedResponse(_)
        ));
    }

    #[test]
    fn test_parse_rejects_negative_volume_and_oi() {
        let ProviderResponse::MalformedResponse(reason) = parse_body(
            r#"{"status":"success","data":{"candles":[["2025-06-06T09:15:00+05:30",1,2,0.5,1.5,-500,0]]}}"#,
        ) else {
            panic!("expected malformed response");
        };
        assert!(reason.contains("volume is negative"));

        let ProviderResponse::MalformedResponse(reason) = parse_body(
            r#"{"status":"success","data":{"candles":[["2025-06-06T09:15:00+05:30",1,2,0.5,1.5,500,-3]]}}"#,
        ) else {
            panic!("expected malformed response");
        };
        assert!(reason.contains("oi is negative"));

        let err = parse_body(
            r#"{"status":"success","data":{"candles":[["2025-06-06T09:15:00+05:30",1,2,0.5,1.5,-500,-3]]}}"#,
        )
        .into_candles()
        .unwrap_err();
        assert!(matches!(err, PipelineError::ProviderLogical(_)));
    }

    #[test]
    fn test_urls() {
        let client = UpstoxClient::new(&test_config("https://api.upstox.com/".to_string())).unwrap();
        let window = HistoricalWindow {
            from: NaiveDate::from_ymd_opt(2025, 5, 22).unwrap(),
            to: NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(),
        };

        assert_eq!(
            client.historical_url("NSE_EQ|INE002A01018", Timeframe::FifteenMinutes, &window),
            "https://api.upstox.com/v3/historical-candle/NSE_EQ%7CINE002A01018/minutes/15/2025-06-05/2025-05-22"
        );
        assert_eq!(
            client.intraday_url("NSE_EQ|INE002A01018", Timeframe::OneHour),
            "https://api.upstox.com/v3/historical-candle/intraday/NSE_EQ%7CINE002A01018/hours/1"
        );
    }

    #[tokio::test]
    async fn test_retries_transient_status() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/v3/historical-candle/intraday/*rest",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        (AxumStatus::SERVICE_UNAVAILABLE, String::new())
                    } else {
                        (AxumStatus::OK, SUCCESS_BODY.to_string())
                    }
                }
            }),
        );
        let client = UpstoxClient::new(&test_config(serve(router).await)).unwrap();

        let response = client
            .fetch_intraday("NSE_EQ|INE002A01018", Timeframe::FifteenMinutes)
            .await
            .unwrap();

        assert!(matches!(response, ProviderResponse::Success(ref c) if c.len() == 2));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/v3/historical-candle/intraday/*rest",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { (AxumStatus::TOO_MANY_REQUESTS, [("retry-after", "0")], "slow down") }
            }),
        );
        let client = UpstoxClient::new(&test_config(serve(router).await)).unwrap();

        let err = client
            .fetch_intraday("NSE_EQ|INE002A01018", Timeframe::FifteenMinutes)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/v3/historical-candle/intraday/*rest",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    (
                        AxumStatus::BAD_REQUEST,
                        r#"{"status":"error","errors":[{"errorCode":"UDAPI1021","message":"Instrument key is invalid"}]}"#,
                    )
                }
            }),
        );
        let client = UpstoxClient::new(&test_config(serve(router).await)).unwrap();

        let response = client
            .fetch_intraday("NSE_EQ|BAD", Timeframe::FifteenMinutes)
            .await
            .unwrap();

        assert!(matches!(response, ProviderResponse::ProviderError(ref m) if m.contains("UDAPI1021")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
