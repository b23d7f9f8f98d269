use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::Pg;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use utoipa::ToSchema;

/// Candle timeframe enumeration
///
/// Partitions candles per instrument. Stored as its text label, and mapped to
/// the provider's `(unit, interval)` pair when fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,

    #[serde(rename = "5m")]
    FiveMinutes,

    #[serde(rename = "15m")]
    FifteenMinutes,

    #[serde(rename = "30m")]
    ThirtyMinutes,

    #[serde(rename = "1h")]
    OneHour,

    #[serde(rename = "4h")]
    FourHours,

    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    /// Database label for this timeframe
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinutes => "5m",
            Timeframe::FifteenMinutes => "15m",
            Timeframe::ThirtyMinutes => "30m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHours => "4h",
            Timeframe::OneDay => "1d",
        }
    }

    /// Parse a database label
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Timeframe::OneMinute),
            "5m" => Some(Timeframe::FiveMinutes),
            "15m" => Some(Timeframe::FifteenMinutes),
            "30m" => Some(Timeframe::ThirtyMinutes),
            "1h" => Some(Timeframe::OneHour),
            "4h" => Some(Timeframe::FourHours),
            "1d" => Some(Timeframe::OneDay),
            _ => None,
        }
    }

    /// Provider granularity as `(unit, interval)`, e.g. `("minutes", 15)`
    pub fn provider_interval(&self) -> (&'static str, u32) {
        match self {
            Timeframe::OneMinute => ("minutes", 1),
            Timeframe::FiveMinutes => ("minutes", 5),
            Timeframe::FifteenMinutes => ("minutes", 15),
            Timeframe::ThirtyMinutes => ("minutes", 30),
            Timeframe::OneHour => ("hours", 1),
            Timeframe::FourHours => ("hours", 4),
            Timeframe::OneDay => ("days", 1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::from_label(s).ok_or_else(|| format!("Invalid timeframe: {}", s))
    }
}

impl ToSql<Text, Pg> for Timeframe {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<Text, Pg> for Timeframe {
    fn from_sql(bytes: <Pg as diesel::backend::Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let text = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
        Timeframe::from_label(&text)
            .ok_or_else(|| format!("Invalid timeframe value: {}", text).into())
    }
}
