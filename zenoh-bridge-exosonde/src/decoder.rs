//! Register bank decoding.
//!
//! Turns one [`RegisterBank`] snapshot into the list of named, typed
//! measurements the instrument currently reports. Decoding never fails:
//! malformed content degrades to diagnostic values instead.

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::lookup::LookupTable;
use crate::registers::{RegisterBank, Slot};

/// Parameter whose value encodes a calendar date as `DDMMYY` digits.
pub const DATE_PARAMETER: &str = "Date (DDMMYY)";

/// Parameter whose value encodes a time of day as `HHMMSS` digits.
pub const TIME_PARAMETER: &str = "Time (HHMMSS)";

/// Whether the instrument holds a valid reading for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Available,
    Unavailable,
}

impl Status {
    /// Interpret a raw status register.
    pub fn from_raw(raw: u16) -> Self {
        if raw == 0 {
            Status::Available
        } else {
            Status::Unavailable
        }
    }
}

/// Typed value of one measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Plain floating point reading.
    Float(f32),
    /// Date reported through the `DDMMYY` parameter.
    Date(NaiveDate),
    /// Time of day reported through the `HHMMSS` parameter.
    Time(NaiveTime),
    /// Diagnostic text for a value that could not be interpreted.
    Invalid(String),
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Float(v) => write!(f, "{}", v),
            Reading::Date(d) => write!(f, "{}", d.format("%d-%m-%Y")),
            Reading::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Reading::Invalid(msg) => f.write_str(msg),
        }
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Float(v) => serializer.serialize_f32(*v),
            other => serializer.collect_str(other),
        }
    }
}

/// One decoded measurement slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRecord {
    #[serde(rename = "#")]
    pub index: usize,
    #[serde(rename = "Parameter Name")]
    pub name: String,
    #[serde(rename = "Status")]
    pub status: Status,
    #[serde(rename = "Value")]
    pub value: Option<Reading>,
}

/// Decodes register snapshots against a shared lookup table.
#[derive(Debug, Clone)]
pub struct RegisterDecoder {
    table: Arc<LookupTable>,
}

impl RegisterDecoder {
    pub fn new(table: Arc<LookupTable>) -> Self {
        Self { table }
    }

    /// Decode every used slot of `bank`, in slot order.
    pub fn decode(&self, bank: &RegisterBank) -> Vec<ParameterRecord> {
        decode(bank, &self.table)
    }
}

/// Decode every used slot of `bank`, in slot order.
///
/// Slots whose code register is zero are left out, so `index` values in the
/// result need not be contiguous.
pub fn decode(bank: &RegisterBank, table: &LookupTable) -> Vec<ParameterRecord> {
    let records: Vec<ParameterRecord> = Slot::all()
        .filter_map(|slot| decode_slot(bank, table, slot))
        .collect();

    for record in &records {
        debug!(
            index = record.index,
            name = %record.name,
            status = ?record.status,
            value = %record.value.as_ref().map(Reading::to_string).unwrap_or_default(),
            "Decoded parameter"
        );
    }

    records
}

fn decode_slot(bank: &RegisterBank, table: &LookupTable, slot: Slot) -> Option<ParameterRecord> {
    let code = bank.code(slot);
    if code == 0 {
        return None;
    }

    let name = match table.lookup(code) {
        Some(name) => name.to_string(),
        None => format!("Unknown (Code {})", code),
    };
    let status = Status::from_raw(bank.status(slot));
    // The value pair is only meaningful while the status says so.
    let raw = bank.value(slot);
    let value = match status {
        Status::Available => Some(interpret(&name, raw)),
        Status::Unavailable => None,
    };

    Some(ParameterRecord {
        index: slot.index(),
        name,
        status,
        value,
    })
}

fn interpret(name: &str, raw: f32) -> Reading {
    match name {
        DATE_PARAMETER => match parse_date(raw) {
            Ok(date) => Reading::Date(date),
            Err(_) => Reading::Invalid(format!("Invalid date: {}", float_repr(raw))),
        },
        TIME_PARAMETER => match parse_time(raw) {
            Ok(time) => Reading::Time(time),
            Err(_) => Reading::Invalid(format!("Invalid time: {}", float_repr(raw))),
        },
        _ => Reading::Float(raw),
    }
}

/// Why a digit-encoded value could not be interpreted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DigitsError {
    #[error("value {0} is not finite")]
    NotFinite(f32),
    #[error("'{0}' is not six digits")]
    Malformed(String),
    #[error("'{0}' is out of range")]
    OutOfRange(String),
    #[error(transparent)]
    Parse(#[from] chrono::ParseError),
}

/// The integer part of `raw`, zero padded to six digits.
fn six_digits(raw: f32) -> Result<String, DigitsError> {
    if !raw.is_finite() {
        return Err(DigitsError::NotFinite(raw));
    }
    Ok(format!("{:06}", raw.trunc() as i64))
}

/// Parse a `DDMMYY` encoded date, e.g. `10199.0` for 1 January 1999.
///
/// Two-digit years 69-99 fall in the 1900s, 00-68 in the 2000s.
pub fn parse_date(raw: f32) -> Result<NaiveDate, DigitsError> {
    let digits = six_digits(raw)?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DigitsError::Malformed(digits));
    }

    let pair = |at: usize| digits[at..at + 2].parse::<u32>();
    let (Ok(day), Ok(month), Ok(yy)) = (pair(0), pair(2), pair(4)) else {
        return Err(DigitsError::Malformed(digits));
    };
    let century = if yy >= 69 { 1900 } else { 2000 };

    NaiveDate::from_ymd_opt(century + yy as i32, month, day).ok_or(DigitsError::OutOfRange(digits))
}

/// Parse an `HHMMSS` encoded time of day, e.g. `120000.0` for noon.
///
/// Second 60 is rejected: the instrument clock has no leap seconds.
pub fn parse_time(raw: f32) -> Result<NaiveTime, DigitsError> {
    let digits = six_digits(raw)?;
    let time = NaiveTime::parse_from_str(&digits, "%H%M%S")?;
    if time.nanosecond() >= 1_000_000_000 {
        return Err(DigitsError::OutOfRange(digits));
    }
    Ok(time)
}

/// Render a reading the way diagnostics report it: widened to `f64`,
/// shortest round-trip form, `nan`/`inf` for non-finite values and a signed
/// two-digit exponent (`1e+16`).
fn float_repr(raw: f32) -> String {
    let value = f64::from(raw);
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let text = format!("{:?}", value);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => text,
    }
}
