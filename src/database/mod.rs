/// Database module for PostgreSQL persistence
///
/// This module provides:
/// - Connection pooling and embedded schema migrations
/// - Repository trait for instruments and candles, with PostgreSQL and in-memory implementations
/// - Database models and schema
/// - Diesel ORM integration

pub mod connection;
pub mod enums;
pub mod models;
pub mod repositories;
pub mod schema;

pub use connection::{establish_connection_pool, DatabaseError, DatabasePool};
