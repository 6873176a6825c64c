//! The catalog of distinct statement texts, written out as `<profile>-queryanalyzer.properties`
//! for the query analyzer.

use std::collections::BTreeMap;
use std::io::{self, Write};

use indexmap::IndexSet;

use crate::statement::{GeneratedStatement, StatementKind};

/// Distinct statement texts by kind, in the order they were first generated.
#[derive(Debug, Default, Clone)]
pub struct QueryCatalog {
    queries: BTreeMap<StatementKind, IndexSet<String>>,
}

impl QueryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the text of `stmt`, returning true if it had not been seen before.
    pub fn add(&mut self, stmt: &GeneratedStatement) -> bool {
        let queries = self.queries.entry(stmt.kind).or_default();
        if queries.contains(&stmt.sql) {
            return false;
        }
        queries.insert(stmt.sql.clone())
    }

    /// Number of distinct statement texts, across all kinds
    pub fn len(&self) -> usize {
        self.queries.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The catalog as sorted `query.<kind>.<n>=<sql>` lines. Statements are numbered from 1
    /// within each kind, zero-padded to the number of digits in the total count.
    pub fn lines(&self) -> Vec<String> {
        let width = self.len().to_string().len();
        let mut lines = self
            .queries
            .iter()
            .flat_map(|(kind, queries)| {
                queries
                    .iter()
                    .enumerate()
                    .map(move |(i, sql)| format!("query.{kind}.{:0width$}={sql}", i + 1))
            })
            .collect::<Vec<_>>();
        lines.sort();
        lines
    }

    pub fn write_to<W>(&self, out: &mut W) -> io::Result<()>
    where
        W: Write + ?Sized,
    {
        for line in self.lines() {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn stmt(kind: StatementKind, sql: &str) -> GeneratedStatement {
        GeneratedStatement::new(kind, 0, sql.to_owned())
    }

    #[test]
    fn deduplicates_and_numbers_per_kind() {
        let mut catalog = QueryCatalog::new();
        assert!(catalog.is_empty());

        let statements = [
            stmt(StatementKind::Select, "SELECT a FROM t WHERE id = ?"),
            stmt(StatementKind::Delete, "DELETE FROM t WHERE id = ?"),
            stmt(StatementKind::Select, "SELECT a FROM t WHERE id = ?"),
        ];
        let added = statements.iter().map(|s| catalog.add(s)).collect::<Vec<_>>();
        assert_eq!(added, vec![true, true, false]);

        for i in 0..9 {
            catalog.add(&stmt(
                StatementKind::Select,
                &format!("SELECT a FROM t WHERE id IN ({})", vec!["?"; i + 1].join(", ")),
            ));
        }
        assert_eq!(catalog.len(), 11);

        let lines = catalog.lines();
        assert_eq!(lines[0], "query.delete.01=DELETE FROM t WHERE id = ?");
        assert_eq!(lines[1], "query.select.01=SELECT a FROM t WHERE id = ?");
        assert_eq!(lines[2], "query.select.02=SELECT a FROM t WHERE id IN (?)");
        assert_eq!(
            lines[10],
            "query.select.10=SELECT a FROM t WHERE id IN (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
    }

    #[test]
    fn empty_catalog_writes_nothing() {
        let mut out = vec![];
        QueryCatalog::new().write_to(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
