//! Configuration: the properties file format, and typed lookups of every generator knob with
//! table, client and global precedence.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::{GeneratorError, GeneratorResult};
use crate::state::ClientId;
use crate::statement::StatementKind;

pub const DEFAULT_ROWS: u64 = 1000;
pub const DEFAULT_CLIENTS: u32 = 1;
pub const DEFAULT_STATEMENTS: u64 = 1000;
pub const DEFAULT_MSPT: u64 = 1;
pub const DEFAULT_COMMIT: u32 = 100;
pub const DEFAULT_ROLLBACK: u32 = 0;
pub const DEFAULT_NOT_NULL: u32 = 100;
pub const DEFAULT_PARTITIONS: u32 = 0;
pub const DEFAULT_IN_COUNT: u32 = 10;
pub const DEFAULT_VERSION: u32 = 16;
pub const DEFAULT_UNIQUE_RETRIES: u64 = 100_000;

mod parse {
    use nom::branch::alt;
    use nom::bytes::complete::take_till1;
    use nom::character::complete::{one_of, space0};
    use nom::combinator::{all_consuming, eof, opt, rest, value};
    use nom::sequence::tuple;
    use nom::IResult;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(super) enum Line<'a> {
        Blank,
        Entry { key: &'a str, value: &'a str },
    }

    pub(super) fn line(i: &str) -> IResult<&str, Line<'_>> {
        all_consuming(alt((blank, comment, entry)))(i)
    }

    fn blank(i: &str) -> IResult<&str, Line<'_>> {
        value(Line::Blank, tuple((space0, eof)))(i)
    }

    fn comment(i: &str) -> IResult<&str, Line<'_>> {
        value(Line::Blank, tuple((space0, one_of("#!"), rest)))(i)
    }

    fn entry(i: &str) -> IResult<&str, Line<'_>> {
        let (i, _) = space0(i)?;
        let (i, key) = take_till1(|c: char| c == '=' || c == ':' || c.is_whitespace())(i)?;
        let (i, _) = space0(i)?;
        let (i, _) = opt(one_of("=:"))(i)?;
        let (i, _) = space0(i)?;
        let (i, value) = rest(i)?;
        Ok((
            i,
            Line::Entry {
                key,
                value: value.trim_end(),
            },
        ))
    }
}

/// Returns true if `line` ends in an odd number of backslashes, meaning it continues on the next
/// physical line.
fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Join continued physical lines into logical lines, each tagged with the (1-based) number of the
/// physical line it starts on.
fn logical_lines(input: &str) -> Vec<(usize, String)> {
    let mut lines = vec![];
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in input.lines().enumerate() {
        let (start, mut text) = match pending.take() {
            Some((start, text)) => (start, text + raw.trim_start()),
            None => {
                let text = raw.trim_start();
                // Comment lines never continue
                if text.starts_with(['#', '!']) {
                    lines.push((idx + 1, text.to_owned()));
                    continue;
                }
                (idx + 1, text.to_owned())
            }
        };

        if continues(&text) {
            text.pop();
            pending = Some((start, text));
        } else {
            lines.push((start, text));
        }
    }

    lines.extend(pending);
    lines
}

/// A parsed properties file.
///
/// Keys keep the order they were first declared in, which is what gives tables their
/// declaration order. Declaring a key twice keeps its original position and the later value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: IndexMap<String, String>,
}

impl Properties {
    pub fn load(path: &Path) -> GeneratorResult<Self> {
        fs::read_to_string(path)?.parse()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.entries.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// All entries whose key starts with `prefix`, with the prefix stripped from the key.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.iter()
            .filter_map(move |(k, v)| Some((k.strip_prefix(prefix)?, v)))
    }

    /// Look up `key` and parse it as a `T`.
    pub fn get_parsed<T>(&self, key: &str) -> GeneratorResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|value| {
                value
                    .parse::<T>()
                    .map_err(|e| GeneratorError::invalid_property(key, value, e))
            })
            .transpose()
    }

    /// Look up a boolean flag, accepting `true` and `false` in any case.
    pub fn get_flag(&self, key: &str) -> GeneratorResult<Option<bool>> {
        self.get(key)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(GeneratorError::invalid_property(
                    key,
                    value,
                    "expected 'true' or 'false'",
                )),
            })
            .transpose()
    }

    /// Parse the first of `keys` that is present.
    pub fn first_parsed<T, I>(&self, keys: I) -> GeneratorResult<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
        I: IntoIterator<Item = String>,
    {
        for key in keys {
            if let Some(value) = self.get_parsed(&key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

impl FromStr for Properties {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut properties = Properties::default();
        for (line, text) in logical_lines(s) {
            match parse::line(&text) {
                Ok((_, parse::Line::Blank)) => {}
                Ok((_, parse::Line::Entry { key, value })) => properties.insert(key, value),
                Err(_) => {
                    return Err(GeneratorError::ConfigSyntax {
                        line,
                        reason: format!("expected 'key=value', found '{text}'"),
                    })
                }
            }
        }
        Ok(properties)
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Properties::default();
        for (k, v) in iter {
            properties.insert(k, v);
        }
        properties
    }
}

/// Relative weights of the three ways a table without foreign keys can be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectModes {
    /// Percentage of selects that look a row up by a secondary index value
    pub by_index: u32,
    /// Percentage of selects that look up a list of primary keys
    pub by_key_list: u32,
    /// Upper bound on the length of a key list
    pub max_list_len: u32,
}

impl SelectModes {
    pub fn by_key(&self) -> u32 {
        100 - self.by_index - self.by_key_list
    }
}

fn scale(count: u64, factor: f64) -> u64 {
    (count as f64 * factor).round() as u64
}

/// Typed access to every knob of a run, resolving overrides with table, then client, then
/// global precedence.
#[derive(Debug, Clone)]
pub struct Settings {
    properties: Properties,
    row_scale: f64,
    statement_scale: f64,
    seed: Option<u64>,
}

impl Settings {
    pub fn new(properties: Properties, row_scale: f64, statement_scale: f64) -> GeneratorResult<Self> {
        for (name, factor) in [("row scale", row_scale), ("statement scale", statement_scale)] {
            if !factor.is_finite() || factor < 0.0 {
                return Err(GeneratorError::invalid_property(
                    name,
                    factor.to_string(),
                    "must be a non-negative number",
                ));
            }
        }
        let seed = properties.get_parsed("seed")?;

        Ok(Self {
            properties,
            row_scale,
            statement_scale,
            seed,
        })
    }

    /// Settings with both scales set to 1
    pub fn unscaled(properties: Properties) -> GeneratorResult<Self> {
        Self::new(properties, 1.0, 1.0)
    }

    /// Override the random seed from the configuration.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    fn table_knob<T>(&self, table: &str, knob: &str, default: T) -> GeneratorResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self
            .properties
            .first_parsed([format!("{table}.{knob}"), knob.to_owned()])?
            .unwrap_or(default))
    }

    fn client_knob<T>(&self, client: ClientId, knob: &str, default: T) -> GeneratorResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self
            .properties
            .first_parsed([format!("client.{client}.{knob}"), knob.to_owned()])?
            .unwrap_or(default))
    }

    fn percentage(&self, key: &str, value: u32) -> GeneratorResult<u32> {
        if value > 100 {
            return Err(GeneratorError::invalid_property(
                key,
                value.to_string(),
                "must be a percentage between 0 and 100",
            ));
        }
        Ok(value)
    }

    /// Number of seed rows for `table`, after scaling.
    pub fn rows(&self, table: &str) -> GeneratorResult<u64> {
        Ok(scale(
            self.table_knob(table, "rows", DEFAULT_ROWS)?,
            self.row_scale,
        ))
    }

    pub fn clients(&self) -> GeneratorResult<u32> {
        Ok(self
            .properties
            .get_parsed("clients")?
            .unwrap_or(DEFAULT_CLIENTS))
    }

    /// Statement budget for `client`, after scaling.
    pub fn statements(&self, client: ClientId) -> GeneratorResult<u64> {
        Ok(scale(
            self.client_knob(client, "statements", DEFAULT_STATEMENTS)?,
            self.statement_scale,
        ))
    }

    /// Maximum number of statements per transaction for `client`.
    pub fn mspt(&self, client: ClientId) -> GeneratorResult<u64> {
        let mspt = self.client_knob(client, "mspt", DEFAULT_MSPT)?;
        if mspt == 0 {
            return Err(GeneratorError::invalid_property(
                "mspt",
                "0",
                "transactions need at least one statement",
            ));
        }
        Ok(mspt)
    }

    pub fn commit_weight(&self, client: ClientId) -> GeneratorResult<u32> {
        self.client_knob(client, "commit", DEFAULT_COMMIT)
    }

    pub fn rollback_weight(&self, client: ClientId) -> GeneratorResult<u32> {
        self.client_knob(client, "rollback", DEFAULT_ROLLBACK)
    }

    /// Weight of `kind` in the statement mix for `table` when generated by `client`.
    pub fn mix(&self, table: &str, client: ClientId, kind: StatementKind) -> GeneratorResult<u32> {
        let knob = format!("mix.{kind}");
        let default = match kind {
            StatementKind::Select => 100,
            _ => 0,
        };
        Ok(self
            .properties
            .first_parsed([
                format!("{table}.{knob}"),
                format!("client.{client}.{knob}"),
                knob,
            ])?
            .unwrap_or(default))
    }

    /// Percentage of values in nullable columns of `table` that are not NULL.
    pub fn not_null_percent(&self, table: &str) -> GeneratorResult<u32> {
        let value = self.table_knob(table, "notnull", DEFAULT_NOT_NULL)?;
        self.percentage("notnull", value)
    }

    pub fn partitions(&self, table: &str) -> GeneratorResult<u32> {
        self.table_knob(table, "partitions", DEFAULT_PARTITIONS)
    }

    pub fn select_modes(&self, table: &str) -> GeneratorResult<SelectModes> {
        let by_index = self.table_knob(table, "mix.select.index", 0)?;
        let by_key_list = self.table_knob(table, "mix.select.in", 0)?;
        let max_list_len = self.table_knob(table, "mix.select.in.count", DEFAULT_IN_COUNT)?;

        let total = self.percentage("mix.select.index", by_index)?
            + self.percentage("mix.select.in", by_key_list)?;
        if total > 100 {
            return Err(GeneratorError::invalid_property(
                "mix.select.in",
                by_key_list.to_string(),
                format!("select sub-modes of '{table}' add up to {total}%"),
            ));
        }
        if max_list_len == 0 {
            return Err(GeneratorError::invalid_property(
                "mix.select.in.count",
                "0",
                "key lists need at least one element",
            ));
        }

        Ok(SelectModes {
            by_index,
            by_key_list,
            max_list_len,
        })
    }

    /// Major version of the target database engine
    pub fn version(&self) -> GeneratorResult<u32> {
        Ok(self
            .properties
            .get_parsed("version")?
            .unwrap_or(DEFAULT_VERSION))
    }

    /// How many times to retry generating a value that must not collide with existing ones.
    pub fn unique_retries(&self) -> GeneratorResult<u64> {
        let retries = self
            .properties
            .get_parsed("unique.retries")?
            .unwrap_or(DEFAULT_UNIQUE_RETRIES);
        if retries == 0 {
            return Err(GeneratorError::invalid_property(
                "unique.retries",
                "0",
                "must allow at least one attempt",
            ));
        }
        Ok(retries)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn settings(input: &str) -> Settings {
        Settings::unscaled(input.parse().unwrap()).unwrap()
    }

    #[test]
    fn parse_properties() {
        let props: Properties = "
# a comment
! another comment
table.customers = People who buy things
customers.column.1=id
customers.column.1.type: serial
  customers.rows 10
empty=
"
        .parse()
        .unwrap();

        assert_eq!(
            props.iter().collect::<Vec<_>>(),
            vec![
                ("table.customers", "People who buy things"),
                ("customers.column.1", "id"),
                ("customers.column.1.type", "serial"),
                ("customers.rows", "10"),
                ("empty", ""),
            ]
        );
    }

    #[test]
    fn parse_continuation_lines() {
        let props: Properties = "index.orders.1 = customer_id, \\\n    placed_at\nnext=1\n"
            .parse()
            .unwrap();
        assert_eq!(props.get("index.orders.1"), Some("customer_id, placed_at"));
        assert_eq!(props.get("next"), Some("1"));
    }

    #[test]
    fn escaped_backslash_does_not_continue() {
        let props: Properties = "a=x\\\\\nb=y".parse().unwrap();
        assert_eq!(props.get("a"), Some("x\\\\"));
        assert_eq!(props.get("b"), Some("y"));
    }

    #[test]
    fn later_values_win_but_keep_position() {
        let props: Properties = "a=1\nb=2\na=3".parse().unwrap();
        assert_eq!(props.iter().collect::<Vec<_>>(), vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = "a=1\n\n=oops".parse::<Properties>().unwrap_err();
        assert!(
            matches!(err, GeneratorError::ConfigSyntax { line: 3, .. }),
            "{err}"
        );
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = settings("rows=many").rows("t").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value 'many' for property 'rows': invalid digit found in string"
        );
    }

    #[test]
    fn defaults() {
        let s = settings("");
        assert_eq!(s.rows("t").unwrap(), 1000);
        assert_eq!(s.clients().unwrap(), 1);
        assert_eq!(s.statements(1).unwrap(), 1000);
        assert_eq!(s.mspt(1).unwrap(), 1);
        assert_eq!(s.mix("t", 1, StatementKind::Select).unwrap(), 100);
        assert_eq!(s.mix("t", 1, StatementKind::Delete).unwrap(), 0);
        assert_eq!(s.commit_weight(1).unwrap(), 100);
        assert_eq!(s.rollback_weight(1).unwrap(), 0);
        assert_eq!(s.not_null_percent("t").unwrap(), 100);
        assert_eq!(s.partitions("t").unwrap(), 0);
        assert_eq!(s.version().unwrap(), 16);
        assert_eq!(s.seed(), None);
        assert_eq!(
            s.select_modes("t").unwrap(),
            SelectModes {
                by_index: 0,
                by_key_list: 0,
                max_list_len: 10
            }
        );
    }

    #[test]
    fn override_precedence() {
        let s = settings(
            "
mix.insert=1
client.2.mix.insert=2
orders.mix.insert=3
statements=50
client.2.statements=70
rows=20
orders.rows=5
",
        );
        assert_eq!(s.mix("customers", 1, StatementKind::Insert).unwrap(), 1);
        assert_eq!(s.mix("customers", 2, StatementKind::Insert).unwrap(), 2);
        assert_eq!(s.mix("orders", 2, StatementKind::Insert).unwrap(), 3);
        assert_eq!(s.statements(1).unwrap(), 50);
        assert_eq!(s.statements(2).unwrap(), 70);
        assert_eq!(s.rows("customers").unwrap(), 20);
        assert_eq!(s.rows("orders").unwrap(), 5);
    }

    #[test]
    fn scales_round() {
        let s = Settings::new("rows=10\nstatements=3".parse().unwrap(), 0.25, 1.5).unwrap();
        assert_eq!(s.rows("t").unwrap(), 3);
        assert_eq!(s.statements(1).unwrap(), 5);
        assert!(Settings::new(Properties::default(), -1.0, 1.0).is_err());
        assert!(Settings::new(Properties::default(), 1.0, f64::NAN).is_err());
    }

    #[test]
    fn select_modes_must_fit_in_100_percent() {
        let s = settings("mix.select.index=60\nt.mix.select.in=50");
        assert!(s.select_modes("other").is_ok());
        assert!(matches!(
            s.select_modes("t"),
            Err(GeneratorError::InvalidProperty { .. })
        ));
        assert_eq!(s.select_modes("other").unwrap().by_key(), 40);
    }

    #[test]
    fn seed_can_be_overridden() {
        let s = settings("seed=12");
        assert_eq!(s.seed(), Some(12));
        assert_eq!(s.with_seed(7).seed(), Some(7));
    }
}
