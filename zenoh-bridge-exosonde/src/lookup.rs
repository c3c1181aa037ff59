//! Parameter code to name lookup table.
//!
//! The instrument reports each measurement channel as a small integer code.
//! The reference table shipped with the sonde (`register_configuration.csv`)
//! lists, for every code register, the codes it may hold and the parameter
//! they stand for.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::registers::CODE_WINDOW;

/// Lookup table errors.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Failed to open lookup table: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse lookup table: {0}")]
    Csv(#[from] csv::Error),
    #[error("Code {code} maps to both '{first}' and '{second}'")]
    Conflict {
        code: u16,
        first: String,
        second: String,
    },
}

/// One row of the reference table. Other columns are ignored.
#[derive(Debug, Deserialize)]
struct Row {
    #[serde(
        rename = "Read Holding Register",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    register: Option<f64>,
    #[serde(
        rename = "Read Holding Register Value",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    code: Option<f64>,
    #[serde(rename = "Specific Parameter", default)]
    name: Option<String>,
}

/// Immutable mapping from parameter code to parameter name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupTable {
    names: BTreeMap<u16, String>,
}

impl LookupTable {
    /// Load the table from a CSV file.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, LookupError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Load the table from CSV data.
    ///
    /// Only rows describing the code registers are kept. A code listed on
    /// several rows must carry the same name on each of them.
    pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Self, LookupError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut pairs = Vec::new();
        for (index, row) in reader.deserialize::<Row>().enumerate() {
            let row = row?;
            let line = index + 2;

            let Some(register) = row.register.and_then(whole_number) else {
                continue;
            };
            if !CODE_WINDOW.contains(&register) {
                continue;
            }

            match (row.code.and_then(whole_number), row.name) {
                (Some(code), Some(name)) if !name.is_empty() => pairs.push((code, name)),
                _ => warn!(line, register, "Skipping incomplete lookup table row"),
            }
        }

        Self::from_pairs(pairs)
    }

    /// Build the table from `(code, name)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, LookupError>
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<String>,
    {
        let mut names: BTreeMap<u16, String> = BTreeMap::new();

        for (code, name) in pairs {
            let name = name.into();
            match names.get(&code) {
                Some(existing) if *existing != name => {
                    return Err(LookupError::Conflict {
                        code,
                        first: existing.clone(),
                        second: name,
                    });
                }
                Some(_) => {}
                None => {
                    names.insert(code, name);
                }
            }
        }

        debug!(codes = names.len(), "Lookup table loaded");
        Ok(Self { names })
    }

    /// Name configured for `code`, if any.
    pub fn lookup(&self, code: u16) -> Option<&str> {
        self.names.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Spreadsheet exports sometimes write integers as `130.0`.
fn whole_number(value: f64) -> Option<u16> {
    if value.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&value) {
        Some(value as u16)
    } else {
        None
    }
}
