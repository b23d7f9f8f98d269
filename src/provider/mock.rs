use super::{CandleProvider, HistoricalWindow, ProviderResponse, RawCandle, TransportError};
use crate::database::enums::Timeframe;
use chrono::{DateTime, Duration, FixedOffset, TimeZone};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted answer for one instrument
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Candles(Vec<RawCandle>),
    ProviderError(String),
    Malformed(String),
    Transport(String),
    Panic,
}

/// In-process provider with per-key scripted responses and a concurrency gauge
#[derive(Default)]
pub struct MockCandleProvider {
    behaviors: DashMap<String, MockBehavior>,
    delay: Option<std::time::Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockCandleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set(&self, instrument_key: &str, behavior: MockBehavior) {
        self.behaviors.insert(instrument_key.to_string(), behavior);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, instrument_key: &str) -> Result<ProviderResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self
            .behaviors
            .get(instrument_key)
            .map(|entry| entry.value().clone())
            .unwrap_or(MockBehavior::Candles(Vec::new()));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match behavior {
            MockBehavior::Candles(candles) => Ok(ProviderResponse::Success(candles)),
            MockBehavior::ProviderError(message) => Ok(ProviderResponse::ProviderError(message)),
            MockBehavior::Malformed(detail) => Ok(ProviderResponse::MalformedResponse(detail)),
            MockBehavior::Transport(message) => Err(TransportError::RetriesExhausted {
                attempts: 4,
                message,
            }),
            MockBehavior::Panic => panic!("scripted provider panic for {}", instrument_key),
        }
    }
}

#[async_trait::async_trait]
impl CandleProvider for MockCandleProvider {
    async fn fetch_historical(
        &self,
        instrument_key: &str,
        _timeframe: Timeframe,
        _window: &HistoricalWindow,
    ) -> Result<ProviderResponse, TransportError> {
        self.respond(instrument_key).await
    }

    async fn fetch_intraday(
        &self,
        instrument_key: &str,
        _timeframe: Timeframe,
    ) -> Result<ProviderResponse, TransportError> {
        self.respond(instrument_key).await
    }
}

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(330 * 60).unwrap()
}

/// `count` candles `step_minutes` apart starting at 09:15 IST on 2025-06-02, newest first
pub fn generate_candles(count: usize, step_minutes: i64) -> Vec<RawCandle> {
    let start: DateTime<FixedOffset> = ist().with_ymd_and_hms(2025, 6, 2, 9, 15, 0).unwrap();
    let mut candles: Vec<RawCandle> = (0..count)
        .map(|i| {
            let base = Decimal::new(100_00 + i as i64, 2);
            RawCandle {
                timestamp: start + Duration::minutes(step_minutes * i as i64),
                open: base,
                high: base + Decimal::ONE,
                low: base - Decimal::ONE,
                close: base,
                volume: 1_000 + i as i64,
                oi: 0,
            }
        })
        .collect();
    candles.reverse();
    candles
}
