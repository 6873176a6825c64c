use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Longest random string we are willing to generate for character columns, regardless of the
/// declared length.
pub(crate) const MAX_RANDOM_TEXT_LENGTH: u32 = 64;

/// Number of distinct characters random strings are drawn from (`[A-Za-z0-9]`).
const ALPHANUMERIC_CHARS: u64 = 62;

/// Timezone offsets (in whole hours) that random `timetz` / `timestamptz` values are drawn from.
pub(crate) const TZ_OFFSET_HOURS: std::ops::RangeInclusive<i32> = -12..=14;

/// Error returned when a column type spelling is not one of the supported scalar types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown column type '{0}'")]
pub struct UnknownType(pub String);

/// The closed set of scalar column types the generator knows how to create, validate and
/// synthesize values for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    SmallInt,
    Int,
    BigInt,
    SmallSerial,
    Serial,
    BigSerial,
    Real,
    Double,
    /// `numeric`/`decimal`, with optional precision and scale
    Numeric(Option<(u32, Option<u32>)>),
    Bool,
    Char(Option<u32>),
    VarChar(Option<u32>),
    Text,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    ByteArray,
    Uuid,
}

/// The type tag a parameter of a given column type is bound with when a client script is
/// replayed. These are the engine's own type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Bool,
    BpChar,
    VarChar,
    Text,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    ByteA,
    Uuid,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Int2 => "int2",
            TypeTag::Int4 => "int4",
            TypeTag::Int8 => "int8",
            TypeTag::Float4 => "float4",
            TypeTag::Float8 => "float8",
            TypeTag::Numeric => "numeric",
            TypeTag::Bool => "bool",
            TypeTag::BpChar => "bpchar",
            TypeTag::VarChar => "varchar",
            TypeTag::Text => "text",
            TypeTag::Date => "date",
            TypeTag::Time => "time",
            TypeTag::TimeTz => "timetz",
            TypeTag::Timestamp => "timestamp",
            TypeTag::TimestampTz => "timestamptz",
            TypeTag::ByteA => "bytea",
            TypeTag::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

impl ColumnType {
    /// Returns true for the auto-generated integer types. Serial columns are never given an
    /// explicit value, and their values are never regenerated by an update.
    pub fn is_serial(&self) -> bool {
        matches!(
            self,
            ColumnType::SmallSerial | ColumnType::Serial | ColumnType::BigSerial
        )
    }

    /// Returns true if literals of this type must be quoted in SQL text.
    pub fn needs_quoting(&self) -> bool {
        !matches!(
            self,
            ColumnType::SmallInt
                | ColumnType::Int
                | ColumnType::BigInt
                | ColumnType::SmallSerial
                | ColumnType::Serial
                | ColumnType::BigSerial
                | ColumnType::Real
                | ColumnType::Double
                | ColumnType::Numeric(_)
                | ColumnType::Bool
        )
    }

    /// Character types are indexed with hash indexes where the engine allows it; everything else
    /// gets a B-tree.
    pub fn is_btree_compatible(&self) -> bool {
        !matches!(
            self,
            ColumnType::Char(_) | ColumnType::VarChar(_) | ColumnType::Text
        )
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            ColumnType::SmallInt | ColumnType::SmallSerial => TypeTag::Int2,
            ColumnType::Int | ColumnType::Serial => TypeTag::Int4,
            ColumnType::BigInt | ColumnType::BigSerial => TypeTag::Int8,
            ColumnType::Real => TypeTag::Float4,
            ColumnType::Double => TypeTag::Float8,
            ColumnType::Numeric(_) => TypeTag::Numeric,
            ColumnType::Bool => TypeTag::Bool,
            ColumnType::Char(_) => TypeTag::BpChar,
            ColumnType::VarChar(_) => TypeTag::VarChar,
            ColumnType::Text => TypeTag::Text,
            ColumnType::Date => TypeTag::Date,
            ColumnType::Time => TypeTag::Time,
            ColumnType::TimeTz => TypeTag::TimeTz,
            ColumnType::Timestamp => TypeTag::Timestamp,
            ColumnType::TimestampTz => TypeTag::TimestampTz,
            ColumnType::ByteArray => TypeTag::ByteA,
            ColumnType::Uuid => TypeTag::Uuid,
        }
    }

    /// The number of distinct values [`random_value_of_type`](crate::random_value_of_type) and
    /// [`unique_value_of_type`](crate::unique_value_of_type) can produce for this type between
    /// them, if that number is small enough to be exhausted by a realistic row count. `None`
    /// means the space is effectively unbounded.
    pub fn value_space(&self) -> Option<u64> {
        match self {
            ColumnType::Bool => Some(2),
            ColumnType::SmallInt => Some(1 << 16),
            ColumnType::Real => Some(crate::REAL_RANGE as u64 * 100),
            // Random values span -(10^p - 1)..=10^p - 1
            ColumnType::Numeric(Some((precision, _))) => 10u64
                .checked_pow((*precision).min(crate::MAX_NUMERIC_PRECISION))
                .and_then(|n| n.checked_mul(2))
                .map(|n| n - 1),
            ColumnType::Char(len) | ColumnType::VarChar(len @ Some(_)) => {
                let len = len.unwrap_or(1).min(MAX_RANDOM_TEXT_LENGTH);
                (1..=len).try_fold(0u64, |total, n| {
                    total.checked_add(ALPHANUMERIC_CHARS.checked_pow(n)?)
                })
            }
            ColumnType::Time => Some(crate::SECONDS_PER_DAY),
            ColumnType::TimeTz => {
                Some(crate::SECONDS_PER_DAY * TZ_OFFSET_HOURS.count() as u64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::SmallInt => f.write_str("smallint"),
            ColumnType::Int => f.write_str("integer"),
            ColumnType::BigInt => f.write_str("bigint"),
            ColumnType::SmallSerial => f.write_str("smallserial"),
            ColumnType::Serial => f.write_str("serial"),
            ColumnType::BigSerial => f.write_str("bigserial"),
            ColumnType::Real => f.write_str("real"),
            ColumnType::Double => f.write_str("double precision"),
            ColumnType::Numeric(None) => f.write_str("numeric"),
            ColumnType::Numeric(Some((precision, None))) => write!(f, "numeric({precision})"),
            ColumnType::Numeric(Some((precision, Some(scale)))) => {
                write!(f, "numeric({precision},{scale})")
            }
            ColumnType::Bool => f.write_str("boolean"),
            ColumnType::Char(None) => f.write_str("char"),
            ColumnType::Char(Some(len)) => write!(f, "char({len})"),
            ColumnType::VarChar(None) => f.write_str("varchar"),
            ColumnType::VarChar(Some(len)) => write!(f, "varchar({len})"),
            ColumnType::Text => f.write_str("text"),
            ColumnType::Date => f.write_str("date"),
            ColumnType::Time => f.write_str("time"),
            ColumnType::TimeTz => f.write_str("time with time zone"),
            ColumnType::Timestamp => f.write_str("timestamp"),
            ColumnType::TimestampTz => f.write_str("timestamp with time zone"),
            ColumnType::ByteArray => f.write_str("bytea"),
            ColumnType::Uuid => f.write_str("uuid"),
        }
    }
}

fn parse_args(args: &str) -> Option<Vec<u32>> {
    args.split(',')
        .map(|arg| arg.trim().parse::<u32>().ok())
        .collect()
}

impl FromStr for ColumnType {
    type Err = UnknownType;

    /// Parse a column type spelling, ignoring case and extra whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownType(s.trim().to_owned());
        let normalized = s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();

        let (name, args) = match normalized.split_once('(') {
            Some((name, rest)) => {
                let args = rest.strip_suffix(')').ok_or_else(unknown)?;
                (name.trim_end(), Some(parse_args(args).ok_or_else(unknown)?))
            }
            None => (normalized.as_str(), None),
        };

        let ty = match (name, args.as_deref()) {
            ("smallint" | "int2", None) => ColumnType::SmallInt,
            ("integer" | "int" | "int4", None) => ColumnType::Int,
            ("bigint" | "int8", None) => ColumnType::BigInt,
            ("smallserial" | "serial2", None) => ColumnType::SmallSerial,
            ("serial" | "serial4", None) => ColumnType::Serial,
            ("bigserial" | "serial8", None) => ColumnType::BigSerial,
            ("real" | "float4", None) => ColumnType::Real,
            ("double precision" | "float8" | "float", None) => ColumnType::Double,
            ("numeric" | "decimal", None) => ColumnType::Numeric(None),
            ("numeric" | "decimal", Some([precision])) if *precision > 0 => {
                ColumnType::Numeric(Some((*precision, None)))
            }
            ("numeric" | "decimal", Some([precision, scale]))
                if *precision > 0 && scale <= precision =>
            {
                ColumnType::Numeric(Some((*precision, Some(*scale))))
            }
            ("boolean" | "bool", None) => ColumnType::Bool,
            ("char" | "character", None) => ColumnType::Char(None),
            ("char" | "character", Some([len])) if *len > 0 => ColumnType::Char(Some(*len)),
            ("varchar" | "character varying", None) => ColumnType::VarChar(None),
            ("varchar" | "character varying", Some([len])) if *len > 0 => {
                ColumnType::VarChar(Some(*len))
            }
            ("text", None) => ColumnType::Text,
            ("date", None) => ColumnType::Date,
            ("time" | "time without time zone", None) => ColumnType::Time,
            ("time with time zone" | "timetz", None) => ColumnType::TimeTz,
            ("timestamp" | "timestamp without time zone", None) => ColumnType::Timestamp,
            ("timestamp with time zone" | "timestamptz", None) => ColumnType::TimestampTz,
            ("bytea", None) => ColumnType::ByteArray,
            ("uuid", None) => ColumnType::Uuid,
            _ => return Err(unknown()),
        };

        Ok(ty)
    }
}
