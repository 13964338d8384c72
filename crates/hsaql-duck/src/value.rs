//! DuckDB value to JSON scalar conversion

use chrono::{DateTime, NaiveDate};
use duckdb::types::{TimeUnit, ValueRef};
use serde_json::{json, Value};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

pub fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => json!(i),
        ValueRef::SmallInt(i) => json!(i),
        ValueRef::Int(i) => json!(i),
        ValueRef::BigInt(i) => json!(i),
        ValueRef::HugeInt(i) => match i64::try_from(i) {
            Ok(small) => json!(small),
            Err(_) => Value::String(i.to_string()),
        },
        ValueRef::UHugeInt(i) => match u64::try_from(i) {
            Ok(small) => json!(small),
            Err(_) => Value::String(i.to_string()),
        },
        ValueRef::UTinyInt(i) => json!(i),
        ValueRef::USmallInt(i) => json!(i),
        ValueRef::UInt(i) => json!(i),
        ValueRef::UBigInt(i) => json!(i),
        ValueRef::Float(f) => json!(f),
        ValueRef::Double(f) => json!(f),
        ValueRef::Decimal(d) => {
            let text = d.to_string();
            match text.parse::<f64>() {
                Ok(f) => json!(f),
                Err(_) => Value::String(text),
            }
        }
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
        ValueRef::Date32(days) => date_to_json(days),
        ValueRef::Timestamp(unit, v) => timestamp_to_json(unit, v),
        _ => Value::String("<unsupported>".to_string()),
    }
}

fn date_to_json(days_since_epoch: i32) -> Value {
    days_since_epoch
        .checked_add(UNIX_EPOCH_CE_DAYS)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

fn timestamp_to_json(unit: TimeUnit, v: i64) -> Value {
    let micros = match unit {
        TimeUnit::Second => v.checked_mul(1_000_000),
        TimeUnit::Millisecond => v.checked_mul(1_000),
        TimeUnit::Microsecond => Some(v),
        TimeUnit::Nanosecond => Some(v / 1_000),
    };

    micros
        .and_then(DateTime::from_timestamp_micros)
        .map(|ts| Value::String(ts.to_rfc3339()))
        .unwrap_or(Value::Null)
}
