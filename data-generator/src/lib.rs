//! Value synthesis for the scalar column types understood by the load generator.
//!
//! There are two ways to get a value for a [`ColumnType`]:
//!
//! - [`unique_value_of_type`] maps a monotonically increasing row index onto a value. It is
//!   injective for as long as the type can represent the index, which makes it the cheap way to
//!   fill key columns during bulk seeding without any duplicate checking.
//! - [`random_value_of_type`] draws a value uniformly from the type's value space using the given
//!   random source. Callers that need uniqueness retry against their own bookkeeping; see
//!   [`ColumnType::value_space`] for the types where that space is small.
//!
//! All values are produced as [`Literal`]s, which know how to render themselves into SQL text or
//! into a replay script parameter.

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use itertools::Itertools;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;

mod column_type;
mod literal;

pub use crate::column_type::{ColumnType, TypeTag, UnknownType};
use crate::column_type::{MAX_RANDOM_TEXT_LENGTH, TZ_OFFSET_HOURS};
pub use crate::literal::Literal;

/// Random dates and timestamps fall within this many days after 2000-01-01.
pub(crate) const DATE_SPAN_DAYS: u64 = 365 * 30;
pub(crate) const SECONDS_PER_DAY: u64 = 86_400;
/// Random `real` values are drawn from `[0, REAL_RANGE)` with two decimal places.
pub(crate) const REAL_RANGE: u32 = 10_000;
/// Largest precision we generate numeric values for; anything wider still fits in an `i64`
/// mantissa at this precision.
pub(crate) const MAX_NUMERIC_PRECISION: u32 = 18;
const DOUBLE_RANGE: f64 = 1.0e9;
const MAX_BYTEA_LENGTH: usize = 16;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_FORMAT: &str = "%H:%M:%S";

fn base_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("2000-01-01 00:00:00 is a valid timestamp")
}

fn time_of_day(secs: u64) -> Option<NaiveTime> {
    NaiveTime::from_num_seconds_from_midnight_opt(u32::try_from(secs).ok()?, 0)
}

/// Precision and scale used to generate values for a numeric column.
fn numeric_bounds(spec: Option<(u32, Option<u32>)>) -> (u32, u32) {
    match spec {
        None => (10, 2),
        Some((precision, scale)) => {
            let precision = precision.min(MAX_NUMERIC_PRECISION);
            (precision, scale.unwrap_or(0).min(precision))
        }
    }
}

fn base36(idx: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut digits = vec![];
    let mut rest = idx;
    loop {
        digits.push(DIGITS[(rest % 36) as usize] as char);
        rest /= 36;
        if rest == 0 {
            break;
        }
    }
    digits.iter().rev().collect()
}

fn random_text<R>(rng: &mut R, max_len: u32) -> String
where
    R: Rng + ?Sized,
{
    let len = rng.gen_range(1..=max_len.clamp(1, MAX_RANDOM_TEXT_LENGTH));
    rng.sample_iter(&Alphanumeric)
        .take(len as usize)
        .map(char::from)
        .collect()
}

fn random_timestamp<R>(rng: &mut R) -> NaiveDateTime
where
    R: Rng + ?Sized,
{
    let secs = rng.gen_range(0..DATE_SPAN_DAYS * SECONDS_PER_DAY);
    base_timestamp() + TimeDelta::seconds(secs as i64)
}

/// Generate a unique value with the given [`ColumnType`] from a monotonically increasing counter,
/// `idx`.
///
/// This is an injective function (from `(idx, typ)` to the resultant [`Literal`]) for as long as
/// it returns `Some`. It returns `None` once `idx` no longer fits in the type, for example for
/// any `idx` above 1 for `boolean`, or once the base-36 rendering of `idx` is longer than a
/// `varchar(n)` column allows.
pub fn unique_value_of_type(typ: &ColumnType, idx: u64) -> Option<Literal> {
    let n = idx.checked_add(1)?;
    let val = match typ {
        ColumnType::SmallInt | ColumnType::SmallSerial => i16::try_from(n).ok()?.to_string(),
        ColumnType::Int | ColumnType::Serial => i32::try_from(n).ok()?.to_string(),
        ColumnType::BigInt | ColumnType::BigSerial => i64::try_from(n).ok()?.to_string(),
        ColumnType::Real => {
            if n >= REAL_RANGE as u64 * 100 {
                return None;
            }
            format!("{}.{:02}", n / 100, n % 100)
        }
        ColumnType::Double => {
            if n >= 1 << 52 {
                return None;
            }
            format!("{n}.5")
        }
        ColumnType::Numeric(spec) => {
            let (precision, scale) = numeric_bounds(*spec);
            if n >= 10u64.pow(precision) {
                return None;
            }
            Decimal::new(n as i64, scale).to_string()
        }
        ColumnType::Bool => match idx {
            0 => "false".to_owned(),
            1 => "true".to_owned(),
            _ => return None,
        },
        ColumnType::Char(len) | ColumnType::VarChar(len @ Some(_)) => {
            let s = base36(idx);
            if s.len() > len.unwrap_or(1) as usize {
                return None;
            }
            s
        }
        ColumnType::VarChar(None) | ColumnType::Text => base36(idx),
        ColumnType::Date => base_timestamp()
            .date()
            .checked_add_days(Days::new(idx))?
            .to_string(),
        ColumnType::Time => time_of_day(idx)?.format(TIME_FORMAT).to_string(),
        ColumnType::TimeTz => format!("{}+00", time_of_day(idx)?.format(TIME_FORMAT)),
        ColumnType::Timestamp | ColumnType::TimestampTz => {
            let ts = base_timestamp()
                .checked_add_signed(TimeDelta::try_seconds(i64::try_from(idx).ok()?)?)?;
            if *typ == ColumnType::TimestampTz {
                format!("{}+00:00", ts.format(TIMESTAMP_FORMAT))
            } else {
                ts.format(TIMESTAMP_FORMAT).to_string()
            }
        }
        ColumnType::ByteArray => format!("\\x{idx:016x}"),
        ColumnType::Uuid => {
            let mut bytes = [u8::MAX; 16];
            bytes[..8].copy_from_slice(&idx.to_be_bytes());
            uuid::Uuid::from_bytes(bytes).to_string()
        }
    };

    Some(Literal::Value(val))
}

/// Generate a random value with the given [`ColumnType`]. The length of character values is
/// pulled from a uniform distribution over the set of possible lengths.
///
/// Serial types always produce [`Literal::Default`], since their values are assigned by the
/// database.
pub fn random_value_of_type<R>(typ: &ColumnType, mut rng: R) -> Literal
where
    R: Rng,
{
    let val = match typ {
        ColumnType::SmallSerial | ColumnType::Serial | ColumnType::BigSerial => {
            return Literal::Default
        }
        ColumnType::SmallInt => rng.gen::<i16>().to_string(),
        ColumnType::Int => rng.gen::<i32>().to_string(),
        ColumnType::BigInt => rng.gen::<i64>().to_string(),
        ColumnType::Real => {
            let n = rng.gen_range(0..REAL_RANGE * 100);
            format!("{}.{:02}", n / 100, n % 100)
        }
        ColumnType::Double => format!("{:.4}", rng.gen_range(-DOUBLE_RANGE..DOUBLE_RANGE)),
        ColumnType::Numeric(spec) => {
            let (precision, scale) = numeric_bounds(*spec);
            let max = 10i64.pow(precision) - 1;
            Decimal::new(rng.gen_range(-max..=max), scale).to_string()
        }
        ColumnType::Bool => rng.gen_bool(0.5).to_string(),
        ColumnType::Char(len) | ColumnType::VarChar(len @ Some(_)) => {
            random_text(&mut rng, len.unwrap_or(1))
        }
        ColumnType::VarChar(None) | ColumnType::Text => {
            random_text(&mut rng, MAX_RANDOM_TEXT_LENGTH)
        }
        ColumnType::Date => (base_timestamp().date()
            + Days::new(rng.gen_range(0..DATE_SPAN_DAYS)))
        .to_string(),
        ColumnType::Time | ColumnType::TimeTz => {
            let time = time_of_day(rng.gen_range(0..SECONDS_PER_DAY))
                .expect("seconds within a day are a valid time")
                .format(TIME_FORMAT);
            if *typ == ColumnType::TimeTz {
                format!("{time}{:+03}", rng.gen_range(TZ_OFFSET_HOURS))
            } else {
                time.to_string()
            }
        }
        ColumnType::Timestamp => random_timestamp(&mut rng).format(TIMESTAMP_FORMAT).to_string(),
        // Always UTC, so that two strings name the same instant only if they are equal
        ColumnType::TimestampTz => {
            format!("{}+00:00", random_timestamp(&mut rng).format(TIMESTAMP_FORMAT))
        }
        ColumnType::ByteArray => {
            let len = rng.gen_range(1..=MAX_BYTEA_LENGTH);
            format!(
                "\\x{}",
                (0..len).map(|_| format!("{:02x}", rng.gen::<u8>())).join("")
            )
        }
        ColumnType::Uuid => uuid::Uuid::from_bytes(rng.gen::<[u8; 16]>()).to_string(),
    };

    Literal::Value(val)
}
