use crate::database::models::NewInstrument;
use crate::errors::PipelineError;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const REQUIRED_COLUMNS: [&str; 4] = ["instrument_key", "trading_symbol", "company_name", "industry"];

/// One snapshot row; extra columns are ignored
#[derive(Debug, Deserialize)]
struct SnapshotRow {
    instrument_key: String,
    trading_symbol: Option<String>,
    company_name: String,
    industry: String,
}

/// Load the instrument snapshot CSV from disk
pub fn load_snapshot_csv(path: &Path, key_prefix: &str) -> Result<Vec<NewInstrument>, PipelineError> {
    let file = File::open(path).map_err(|e| {
        PipelineError::Configuration(format!("cannot open instrument snapshot {}: {}", path.display(), e))
    })?;

    let instruments = read_snapshot(BufReader::new(file), key_prefix)?;
    tracing::info!("Loaded {} instruments from {}", instruments.len(), path.display());
    Ok(instruments)
}

/// Parse snapshot rows, prefixing bare keys with the exchange segment
pub fn read_snapshot<R: Read>(reader: R, key_prefix: &str) -> Result<Vec<NewInstrument>, PipelineError> {
    let mut csv_reader = csv::Reader::from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| PipelineError::Configuration(format!("unreadable snapshot header: {}", e)))?
        .clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h.trim() == *column))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::Configuration(format!(
            "snapshot is missing required columns: {}",
            missing.join(", ")
        )));
    }

    let mut instruments = Vec::new();
    for (line, result) in csv_reader.deserialize::<SnapshotRow>().enumerate() {
        let row = result.map_err(|e| {
            PipelineError::Configuration(format!("invalid snapshot row {}: {}", line + 2, e))
        })?;

        let key = row.instrument_key.trim();
        let instrument_key = if key.contains('|') || key.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", key_prefix, key)
        };

        instruments.push(NewInstrument {
            instrument_key,
            trading_symbol: row
                .trading_symbol
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            company_name: row.company_name.trim().to_string(),
            industry: row.industry.trim().to_string(),
        });
    }

    Ok(instruments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SNAPSHOT: &str = "\
company_name,industry,trading_symbol,series,instrument_key
Reliance Industries Ltd.,Oil Gas & Consumable Fuels,RELIANCE,EQ,INE002A01018
HDFC Bank Ltd.,Financial Services,HDFCBANK,EQ,NSE_EQ|INE040A01034
Infosys Ltd.,Information Technology,,EQ,INE009A01021
";

    #[test]
    fn test_read_snapshot() {
        let instruments = read_snapshot(SNAPSHOT.as_bytes(), "NSE_EQ|").unwrap();

        assert_eq!(instruments.len(), 3);
        assert_eq!(instruments[0].instrument_key, "NSE_EQ|INE002A01018");
        assert_eq!(instruments[0].trading_symbol.as_deref(), Some("RELIANCE"));
        assert_eq!(instruments[1].instrument_key, "NSE_EQ|INE040A01034");
        assert_eq!(instruments[2].trading_symbol, None);
        assert_eq!(instruments[2].industry, "Information Technology");
    }

    #[test]
    fn test_missing_columns() {
        let csv = "instrument_key,company_name\nINE002A01018,Reliance\n";
        let err = read_snapshot(csv.as_bytes(), "NSE_EQ|").unwrap_err();

        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("trading_symbol"));
        assert!(err.to_string().contains("industry"));
    }

    #[test]
    fn test_header_only_yields_empty() {
        let csv = "instrument_key,trading_symbol,company_name,industry\n";
        assert!(read_snapshot(csv.as_bytes(), "NSE_EQ|").unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SNAPSHOT.as_bytes()).unwrap();

        let instruments = load_snapshot_csv(file.path(), "NSE_EQ|").unwrap();
        assert_eq!(instruments.len(), 3);
    }

    #[test]
    fn test_missing_file() {
        let err = load_snapshot_csv(Path::new("/nonexistent/NSE_500.csv"), "NSE_EQ|").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
