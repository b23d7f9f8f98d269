use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Instrument entity - a tradable security tracked by the feed
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Identifiable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = crate::database::schema::instruments)]
#[diesel(primary_key(instrument_key))]
pub struct Instrument {
    /// Provider instrument key (e.g., "NSE_EQ|INE839G01010")
    pub instrument_key: String,

    /// Exchange trading symbol (e.g., "RELIANCE")
    pub trading_symbol: Option<String>,

    /// Company name
    pub company_name: String,

    /// Industry classification from the snapshot
    pub industry: String,
}

/// New instrument for insertion, one row of the instrument snapshot
#[derive(Debug, Clone, PartialEq, Eq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::instruments)]
pub struct NewInstrument {
    pub instrument_key: String,
    pub trading_symbol: Option<String>,
    pub company_name: String,
    pub industry: String,
}

impl NewInstrument {
    pub fn new(
        instrument_key: impl Into<String>,
        company_name: impl Into<String>,
        industry: impl Into<String>,
    ) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            trading_symbol: None,
            company_name: company_name.into(),
            industry: industry.into(),
        }
    }

    /// Set trading symbol
    pub fn with_trading_symbol(mut self, trading_symbol: impl Into<String>) -> Self {
        self.trading_symbol = Some(trading_symbol.into());
        self
    }

    /// Names the first required field that is blank, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.instrument_key.trim().is_empty() {
            Some("instrument_key")
        } else if self.company_name.trim().is_empty() {
            Some("company_name")
        } else if self.industry.trim().is_empty() {
            Some("industry")
        } else {
            None
        }
    }
}

impl From<NewInstrument> for Instrument {
    fn from(row: NewInstrument) -> Self {
        Instrument {
            instrument_key: row.instrument_key,
            trading_symbol: row.trading_symbol,
            company_name: row.company_name,
            industry: row.industry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instrument_builder() {
        let instrument = NewInstrument::new("NSE_EQ|INE002A01018", "Reliance Industries Ltd.", "Oil Gas & Consumable Fuels")
            .with_trading_symbol("RELIANCE");

        assert_eq!(instrument.instrument_key, "NSE_EQ|INE002A01018");
        assert_eq!(instrument.trading_symbol.as_deref(), Some("RELIANCE"));
        assert_eq!(instrument.missing_field(), None);
    }

    #[test]
    fn test_missing_field() {
        assert_eq!(NewInstrument::new(" ", "A", "B").missing_field(), Some("instrument_key"));
        assert_eq!(NewInstrument::new("K", "", "B").missing_field(), Some("company_name"));
        assert_eq!(NewInstrument::new("K", "A", "").missing_field(), Some("industry"));
    }
}
