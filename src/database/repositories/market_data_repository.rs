use crate::database::connection::{DatabaseError, PgPooledConnection};
use crate::database::enums::Timeframe;
use crate::database::models::{Candle, Instrument, NewCandle, NewInstrument};
use crate::database::schema::{candles, instruments};
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use diesel::upsert::excluded;
use std::collections::HashSet;
use std::sync::Arc;

/// Rows per INSERT statement, keeps bind parameters under the PostgreSQL limit
const INSERT_CHUNK_SIZE: usize = 1000;

/// Outcome of a bulk upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

/// Storage primitives available inside a transaction scope
///
/// Every call made through one `MarketDataTx` commits or rolls back together.
pub trait MarketDataTx {
    /// All persisted instrument keys
    fn instrument_keys(&mut self) -> Result<HashSet<String>, DatabaseError>;

    fn insert_instruments(&mut self, rows: &[NewInstrument]) -> Result<usize, DatabaseError>;

    /// Delete instruments and every candle that references them
    fn delete_instruments(&mut self, keys: &[String]) -> Result<usize, DatabaseError>;

    /// Timestamps already persisted for a partition
    fn candle_timestamps(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
    ) -> Result<HashSet<DateTime<Utc>>, DatabaseError>;

    /// Insert-only bulk write; rows whose (instrument_key, timeframe, timestamp)
    /// already exists are skipped. Returns the number of rows actually inserted.
    fn insert_candles(&mut self, rows: &[NewCandle]) -> Result<usize, DatabaseError>;

    /// Insert-or-update keyed on (instrument_key, timeframe, timestamp)
    ///
    /// All rows must belong to the given partition.
    fn upsert_candles(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
        rows: &[NewCandle],
    ) -> Result<UpsertCounts, DatabaseError>;

    /// Delete rows ranked beyond `keep` by timestamp descending within the partition
    fn trim_partition(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
        keep: usize,
    ) -> Result<usize, DatabaseError>;
}

/// Unit of work executed by [`MarketDataRepository::transaction`]
pub type TxWork<'a> = dyn FnMut(&mut dyn MarketDataTx) -> Result<(), DatabaseError> + 'a;

/// Market data repository trait - instruments and their candle partitions
#[async_trait::async_trait]
pub trait MarketDataRepository: Send + Sync {
    /// Get all instruments ordered by key
    fn get_instruments(&self) -> Result<Vec<Instrument>, DatabaseError>;

    /// Get all instrument keys ordered by key
    fn get_instrument_keys(&self) -> Result<Vec<String>, DatabaseError>;

    /// Get candles of a partition, newest first
    fn get_candles(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
        limit: Option<i64>,
    ) -> Result<Vec<Candle>, DatabaseError>;

    /// Count candles of a partition
    fn count_candles(&self, instrument_key: &str, timeframe: Timeframe) -> Result<i64, DatabaseError>;

    /// Run `work` in a transaction: commit on `Ok`, roll back on `Err`
    fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), DatabaseError>;
}

/// PostgreSQL implementation of MarketDataRepository
pub struct MarketDataRepositoryImpl {
    get_conn: Arc<dyn Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync>,
}

impl MarketDataRepositoryImpl {
    /// Create new repository with connection provider
    pub fn new<F>(get_conn: F) -> Self
    where
        F: Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync + 'static,
    {
        Self {
            get_conn: Arc::new(get_conn),
        }
    }
}

#[async_trait::async_trait]
impl MarketDataRepository for MarketDataRepositoryImpl {
    fn get_instruments(&self) -> Result<Vec<Instrument>, DatabaseError> {
        let mut conn = (self.get_conn)()?;

        instruments::table
            .order(instruments::instrument_key.asc())
            .load::<Instrument>(&mut conn)
            .map_err(DatabaseError::from)
    }

    fn get_instrument_keys(&self) -> Result<Vec<String>, DatabaseError> {
        let mut conn = (self.get_conn)()?;

        instruments::table
            .select(instruments::instrument_key)
            .order(instruments::instrument_key.asc())
            .load::<String>(&mut conn)
            .map_err(DatabaseError::from)
    }

    fn get_candles(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
        limit: Option<i64>,
    ) -> Result<Vec<Candle>, DatabaseError> {
        let mut conn = (self.get_conn)()?;

        let mut query = candles::table
            .filter(candles::instrument_key.eq(instrument_key))
            .filter(candles::timeframe.eq(timeframe))
            .order(candles::timestamp.desc())
            .into_boxed();

        if let Some(limit_val) = limit {
            query = query.limit(limit_val);
        }

        query.load::<Candle>(&mut conn).map_err(DatabaseError::from)
    }

    fn count_candles(&self, instrument_key: &str, timeframe: Timeframe) -> Result<i64, DatabaseError> {
        let mut conn = (self.get_conn)()?;

        candles::table
            .filter(candles::instrument_key.eq(instrument_key))
            .filter(candles::timeframe.eq(timeframe))
            .count()
            .get_result::<i64>(&mut conn)
            .map_err(DatabaseError::from)
    }

    fn transaction(&self, work: &mut TxWork<'_>) -> Result<(), DatabaseError> {
        let mut conn = (self.get_conn)()?;

        conn.transaction::<_, DatabaseError, _>(|conn| {
            let mut tx = PgMarketDataTx { conn: &mut **conn };
            work(&mut tx)
        })
    }
}

/// Transaction-scoped view over a pooled connection
struct PgMarketDataTx<'a> {
    conn: &'a mut PgConnection,
}

impl MarketDataTx for PgMarketDataTx<'_> {
    fn instrument_keys(&mut self) -> Result<HashSet<String>, DatabaseError> {
        let keys = instruments::table
            .select(instruments::instrument_key)
            .load::<String>(self.conn)?;

        Ok(keys.into_iter().collect())
    }

    fn insert_instruments(&mut self, rows: &[NewInstrument]) -> Result<usize, DatabaseError> {
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            inserted += diesel::insert_into(instruments::table)
                .values(chunk)
                .execute(self.conn)?;
        }
        Ok(inserted)
    }

    fn delete_instruments(&mut self, keys: &[String]) -> Result<usize, DatabaseError> {
        if keys.is_empty() {
            return Ok(0);
        }

        // The foreign key cascades as well; deleting explicitly keeps older schemas clean
        let candles_deleted = diesel::delete(candles::table)
            .filter(candles::instrument_key.eq_any(keys))
            .execute(self.conn)?;

        let deleted = diesel::delete(instruments::table)
            .filter(instruments::instrument_key.eq_any(keys))
            .execute(self.conn)?;

        tracing::debug!(
            "Deleted {} instruments and {} of their candles",
            deleted,
            candles_deleted
        );

        Ok(deleted)
    }

    fn candle_timestamps(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
    ) -> Result<HashSet<DateTime<Utc>>, DatabaseError> {
        let timestamps = candles::table
            .filter(candles::instrument_key.eq(instrument_key))
            .filter(candles::timeframe.eq(timeframe))
            .select(candles::timestamp)
            .load::<DateTime<Utc>>(self.conn)?;

        Ok(timestamps.into_iter().collect())
    }

    fn insert_candles(&mut self, rows: &[NewCandle]) -> Result<usize, DatabaseError> {
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            inserted += diesel::insert_into(candles::table)
                .values(chunk)
                .on_conflict((candles::instrument_key, candles::timeframe, candles::timestamp))
                .do_nothing()
                .execute(self.conn)?;
        }
        Ok(inserted)
    }

    fn upsert_candles(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
        rows: &[NewCandle],
    ) -> Result<UpsertCounts, DatabaseError> {
        if rows.is_empty() {
            return Ok(UpsertCounts::default());
        }

        let timestamps: Vec<DateTime<Utc>> = rows.iter().map(|row| row.timestamp).collect();

        // Rows already present become updates. A concurrent writer on the same partition
        // can only shift the split between inserted and updated, not the written rows.
        let existing = candles::table
            .filter(candles::instrument_key.eq(instrument_key))
            .filter(candles::timeframe.eq(timeframe))
            .filter(candles::timestamp.eq_any(&timestamps))
            .count()
            .get_result::<i64>(self.conn)? as usize;

        let mut written = 0;
        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            written += diesel::insert_into(candles::table)
                .values(chunk)
                .on_conflict((candles::instrument_key, candles::timeframe, candles::timestamp))
                .do_update()
                .set((
                    candles::open.eq(excluded(candles::open)),
                    candles::high.eq(excluded(candles::high)),
                    candles::low.eq(excluded(candles::low)),
                    candles::close.eq(excluded(candles::close)),
                    candles::volume.eq(excluded(candles::volume)),
                    candles::oi.eq(excluded(candles::oi)),
                ))
                .execute(self.conn)?;
        }

        Ok(UpsertCounts {
            inserted: written.saturating_sub(existing),
            updated: existing,
        })
    }

    fn trim_partition(
        &mut self,
        instrument_key: &str,
        timeframe: Timeframe,
        keep: usize,
    ) -> Result<usize, DatabaseError> {
        let deleted = diesel::sql_query(
            "DELETE FROM candles \
             WHERE id IN ( \
                 SELECT id FROM ( \
                     SELECT id, ROW_NUMBER() OVER (ORDER BY \"timestamp\" DESC) AS rn \
                     FROM candles \
                     WHERE instrument_key = $1 AND timeframe = $2 \
                 ) AS ranked \
                 WHERE rn > $3 \
             )",
        )
        .bind::<Text, _>(instrument_key)
        .bind::<Text, _>(timeframe.as_str())
        .bind::<BigInt, _>(keep as i64)
        .execute(self.conn)?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_counts_default() {
        let counts = UpsertCounts::default();
        assert_eq!(counts.inserted, 0);
        assert_eq!(counts.updated, 0);
    }

    // Requires a migrated PostgreSQL database
    #[test]
    #[ignore]
    fn test_market_data_repository() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = crate::database::establish_connection_pool(&url, 2).unwrap();
        pool.run_migrations().unwrap();

        let repository = MarketDataRepositoryImpl::new(move || pool.get_conn());
        assert!(repository.get_instruments().is_ok());
    }
}
