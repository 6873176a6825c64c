//! Generated statements, and the line-oriented format client scripts are written in.
//!
//! Every record of a client script is four lines:
//!
//! ```text
//! P
//! <sql text with ? placeholders>
//! <parameter type tags, separated by |>
//! <parameter values, separated by |>
//! ```
//!
//! Transactions are delimited by `BEGIN`, `COMMIT` and `ROLLBACK` records of the same shape, with
//! empty type and value lines.

use std::fmt;
use std::io::{self, Write};

use data_generator::{Literal, TypeTag};
use itertools::Itertools;

use crate::schema::TableId;

/// Marker line starting every record
const RECORD_MARKER: &str = "P";
const PARAM_DELIMITER: &str = "|";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatementKind {
    Select,
    Update,
    Insert,
    Delete,
}

impl StatementKind {
    pub const ALL: [StatementKind; 4] = [
        StatementKind::Select,
        StatementKind::Update,
        StatementKind::Insert,
        StatementKind::Delete,
    ];
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementKind::Select => "select",
            StatementKind::Update => "update",
            StatementKind::Insert => "insert",
            StatementKind::Delete => "delete",
        })
    }
}

/// A statement with `?` placeholders, along with the type and value of each parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedStatement {
    pub kind: StatementKind,
    pub table: TableId,
    pub sql: String,
    pub types: Vec<TypeTag>,
    pub values: Vec<Literal>,
}

impl GeneratedStatement {
    pub fn new(kind: StatementKind, table: TableId, sql: String) -> Self {
        Self {
            kind,
            table,
            sql,
            types: vec![],
            values: vec![],
        }
    }

    /// Add a parameter, in placeholder order.
    pub fn bind(&mut self, ty: TypeTag, value: Literal) {
        self.types.push(ty);
        self.values.push(value);
    }
}

/// One record of a client script
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    Begin,
    Commit,
    Rollback,
    Statement(&'a GeneratedStatement),
}

impl Record<'_> {
    pub fn write_to<W>(&self, out: &mut W) -> io::Result<()>
    where
        W: Write + ?Sized,
    {
        let (sql, types, values) = match self {
            Record::Begin => ("BEGIN", String::new(), String::new()),
            Record::Commit => ("COMMIT", String::new(), String::new()),
            Record::Rollback => ("ROLLBACK", String::new(), String::new()),
            Record::Statement(stmt) => (
                stmt.sql.as_str(),
                stmt.types.iter().join(PARAM_DELIMITER),
                stmt.values.iter().map(Literal::as_param).join(PARAM_DELIMITER),
            ),
        };
        writeln!(out, "{RECORD_MARKER}\n{sql}\n{types}\n{values}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn write_records() {
        let mut stmt = GeneratedStatement::new(
            StatementKind::Update,
            0,
            "UPDATE t SET a = ?, b = ? WHERE id = ?".to_owned(),
        );
        stmt.bind(TypeTag::Text, "it's".into());
        stmt.bind(TypeTag::Int4, Literal::Null);
        stmt.bind(TypeTag::Int8, "3".into());

        let mut out = vec![];
        for record in [Record::Begin, Record::Statement(&stmt), Record::Rollback] {
            record.write_to(&mut out).unwrap();
        }

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "P\nBEGIN\n\n\n\
             P\nUPDATE t SET a = ?, b = ? WHERE id = ?\ntext|int4|int8\nit's|NULL|3\n\
             P\nROLLBACK\n\n\n"
        );
    }

    #[test]
    fn kind_names() {
        assert_eq!(
            StatementKind::ALL.map(|k| k.to_string()),
            ["select", "update", "insert", "delete"]
        );
    }
}
