//! Model diagnostics files.
//!
//! A diagnostics file is CSV with a header of metric names and one row of
//! values, e.g.
//!
//! ```text
//! observed_data_series,filename,DIAG_NASH_SUTCLIFFE,DIAG_RMSE,
//! HYDROGRAPH_CALIBRATION[1],qobs.nc,0.5123,12.4,
//! ```
//!
//! Leading identifier columns and a trailing empty column are tolerated.
//! Only the first data row is read.

use rv_types::ModelError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Diagnostics {
    /// Column name and raw value, in file order.
    columns: Vec<(String, String)>,
}

fn unparseable(detail: impl std::fmt::Display) -> ModelError {
    ModelError::Execution {
        message: format!("unparseable diagnostics: {detail}"),
    }
}

impl Diagnostics {
    pub fn parse(bytes: &[u8]) -> Result<Self, ModelError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let header = reader.headers().map_err(unparseable)?.clone();
        if header.iter().all(str::is_empty) {
            return Err(unparseable("missing header row"));
        }

        let row = match reader.records().next() {
            Some(row) => row.map_err(unparseable)?,
            None => return Err(unparseable("no value row")),
        };

        let columns = header
            .iter()
            .zip(row.iter())
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Ok(Self { columns })
    }

    pub fn from_metrics(metrics: &BTreeMap<String, f64>) -> Self {
        Self {
            columns: metrics
                .iter()
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.as_str())
    }

    /// Numeric value of `name`. Absent or non-numeric columns are
    /// `ObjectiveMissing`.
    pub fn metric(&self, name: &str) -> Result<f64, ModelError> {
        self.get(name)
            .and_then(|raw| raw.parse::<f64>().ok())
            .ok_or_else(|| ModelError::ObjectiveMissing {
                metric: name.to_string(),
            })
    }

    /// Every column that parses as a number.
    pub fn numeric(&self) -> BTreeMap<String, f64> {
        self.columns
            .iter()
            .filter_map(|(name, raw)| raw.parse::<f64>().ok().map(|v| (name.clone(), v)))
            .collect()
    }

    pub fn to_csv(&self) -> Result<Vec<u8>, ModelError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(self.columns.iter().map(|(name, _)| name))
            .map_err(unparseable)?;
        writer
            .write_record(self.columns.iter().map(|(_, value)| value))
            .map_err(unparseable)?;
        writer.into_inner().map_err(|e| unparseable(e.error()))
    }
}
