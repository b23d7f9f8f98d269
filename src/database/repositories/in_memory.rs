use crate::database::connection::DatabaseError;
use crate::database::enums::Timeframe;
use crate::database::models::{Candle, Instrument, NewCandle, NewInstrument};
use crate::database::repositories::market_data_repository::{
    MarketDataRepository, MarketDataTx, TxWork, UpsertCounts,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

type PartitionKey = (String, Timeframe);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    instruments: BTreeMap<String, Instrument>,
    candles: HashMap<PartitionKey, BTreeMap<DateTime<Utc>, Candle>>,
    next_candle_id: i64,
}

/// Non-persistent MarketDataRepository
///
/// Enforces the same key uniqueness, foreign key, non-negative volume/oi and
/// all-or-nothing transaction rules as the PostgreSQL schema. Used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryMarketDataRepository {
    state: Mutex<MemoryState>,
    failing_keys: Mutex<HashSet<String>>,
}

impl InMemoryMarketDataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed instruments outside of any sync path
    pub fn with_instruments(instruments: Vec<NewInstrument>) -> Self {
        let repository = Self::new();
        {
            let mut state = repository.state.lock();
            for row in instruments {
                state
                    .instruments
                    .insert(row.instrument_key.clone(), Instrument::from(row));
            }
        }
        repository
    }

    /// Make every write touching `instrument_key` fail, simulating a constraint or connection error
    pub fn fail_writes_for(&self, instrument_key: &str) {
        self.failing_keys.lock().insert(instrument_key.to_string());
    }

    /// Number of partitions holding at least one candle
    pub fn partition_count(&self) -> usize {
        self.state
            .lock()
            .candles
            .values()
            .filter(|rows| !rows.is_empty())
            .count()
    }
}

#[async_trait::async_trait]
impl MarketDataRepository for InMemoryMarketDataRepository {
    fn get_instruments(&self) -> Result<Vec<Instrument>, DatabaseError> {
        Ok(self.state.lock().instruments.values().cloned().collect())
    }

    fn get_instrument_keys(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(self.state.lock().instruments.keys().cloned().collect())
    }

    fn get_candles(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
        limit: Option<i64>,
    ) -> Result<Vec<Candle>, DatabaseError> {
        let state = self.state.lock();
        let limit = limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);

        Ok(state
            .candles
            .get(&(instrument_key.to_string(), timeframe))
            .map(|rows| rows.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn count_candles(&self, instrument_key: &str, timeframe: Timeframe) -> Result<i64, DatabaseError> {
        let state = self.state.lock();

        Ok(state
            .candles
            .get(&(instrument_key.to_string(), timeframe))
            .map(|rows| rows.len() as i64)
            .unwrap_or(0))
    }

    fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), DatabaseError> {
        let mut state = self.state.lock();
        let failing_keys = self.failing_keys.lock().clone();

        let mut working = state.clone();
        let mut tx = MemoryTx {
            state: &mut working,
            failing_keys: &failing_keys,
        };

        work(&mut tx)?;

        *state = working;
        Ok(())
    }
}

struct MemoryTx<'a> {
    state: &'a mut MemoryState,
    failing_keys: &'a HashSet<String>,
}

impl MemoryTx<'_> {
    fn check_writable(&self, instrument_key: &str) -> Result<(), DatabaseError> {
        if self.failing_keys.contains(instrument_key) {
            return Err(DatabaseError::QueryError(format!(
                "write rejected for {}",
                instrument_key
            )));
        }
        Ok(())
    }

    fn check_instrument_exists(&self, instrument_key: &str) -> Result<(), DatabaseError> {
        if !self.state.instruments.contains_key(instrument_key) {
            return Err(DatabaseError::QueryError(format!(
                "insert or update on table \"candles\" violates foreign key constraint: {} not present",
                instrument_key
            )));
        }
        Ok(())
    }

    /// Mirrors the `volume >= 0` and `oi >= 0` table checks
    fn check_candle_constraints(row: &NewCandle) -> Result<(), DatabaseError> {
        if row.volume < 0 || row.oi < 0 {
            return Err(DatabaseError::QueryError(format!(
                "new row for relation \"candles\" violates check constraint: {} {} volume={} oi={}",
                row.instrument_key, row.timestamp, row.volume, row.oi
            )));
        }
        Ok(())
    }

    fn to_candle(&mut self, row: &NewCandle) -> Candle {
        self.state.next_candle_id += 1;
        Candle {
            id: self.state.next_candle_id,
            instrument_key: row.instrument_key.clone(),
            timeframe: row.timeframe,
            timestamp: row.timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            oi: row.oi,
        }
    }
}

impl MarketDataTx for MemoryTx<'_> {
    fn instrument_keys(&mut self) -> Result<HashSet<String>, DatabaseError> {
        Ok(self.state.instruments.keys().cloned().collect())
    }

    fn insert_instruments(&mut self, rows: &[NewInstrument]) -> Result<usize, DatabaseError> {
        for row in rows {
            self.check_writable(&row.instrument_key)?;
            if self.state.instruments.contains_key(&row.instrument_key) {
                return Err(DatabaseError::QueryError(format!(
                    "duplicate key value violates unique constraint \"instruments_pkey\": {}",
                    row.instrument_key
                )));
            }
            self.state
                .instruments
                .insert(row.instrument_key.clone(), Instrument::from(row.clone()));
        }
        Ok(rows.len())
    }

    fn delete_instruments(&mut self, keys: &[String]) -> Result<usize, DatabaseError> {
        let mut deleted = 0;
        for key in keys {
            self.check_writable(key)?;
            if self.state.instruments.remove(key).is_some() {
                deleted += 1;
            }
            self.state.candles.retain(|(owner, _), _| owner != key);
        }
        Ok(deleted)
    }

    fn candle_timestamps(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
    ) -> Result<HashSet<DateTime<Utc>>, DatabaseError> {
        Ok(self
            .state
            .candles
            .get(&(instrument_key.to_string(), timeframe))
            .map(|rows| rows.keys().copied().collect())
            .unwrap_or_default())
    }

    fn insert_candles(&mut self, rows: &[NewCandle]) -> Result<usize, DatabaseError> {
        let mut inserted = 0;
        for row in rows {
            self.check_writable(&row.instrument_key)?;
            self.check_instrument_exists(&row.instrument_key)?;
            Self::check_candle_constraints(row)?;

            let exists = self
                .state
                .candles
                .get(&(row.instrument_key.clone(), row.timeframe))
                .is_some_and(|partition| partition.contains_key(&row.timestamp));
            if exists {
                continue;
            }

            let candle = self.to_candle(row);
            self.state
                .candles
                .entry((row.instrument_key.clone(), row.timeframe))
                .or_default()
                .insert(row.timestamp, candle);
            inserted += 1;
        }
        Ok(inserted)
    }

    fn upsert_candles(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
        rows: &[NewCandle],
    ) -> Result<UpsertCounts, DatabaseError> {
        self.check_writable(instrument_key)?;
        self.check_instrument_exists(instrument_key)?;

        let mut counts = UpsertCounts::default();
        for row in rows {
            Self::check_candle_constraints(row)?;
            let candle = self.to_candle(row);
            let partition = self
                .state
                .candles
                .entry((instrument_key.to_string(), timeframe))
                .or_default();

            match partition.get_mut(&row.timestamp) {
                Some(existing) => {
                    existing.open = row.open;
                    existing.high = row.high;
                    existing.low = row.low;
                    existing.close = row.close;
                    existing.volume = row.volume;
                    existing.oi = row.oi;
                    counts.updated += 1;
                }
                None => {
                    partition.insert(row.timestamp, candle);
                    counts.inserted += 1;
                }
            }
        }
        Ok(counts)
    }

    fn trim_partition(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
        keep: usize,
    ) -> Result<usize, DatabaseError> {
        self.check_writable(instrument_key)?;

        let Some(partition) = self
            .state
            .candles
            .get_mut(&(instrument_key.to_string(), timeframe))
        else {
            return Ok(0);
        };

        let excess = partition.len().saturating_sub(keep);
        let oldest: Vec<DateTime<Utc>> = partition.keys().take(excess).copied().collect();
        for timestamp in &oldest {
            partition.remove(timestamp);
        }
        Ok(oldest.len())
    }
}
