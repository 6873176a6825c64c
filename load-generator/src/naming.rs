//! Naming conventions for generated constraints, indexes and partitions.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    ForeignKey,
    Unique,
    Index,
}

impl ConstraintKind {
    fn prefix(&self) -> &'static str {
        match self {
            ConstraintKind::ForeignKey => "fk",
            ConstraintKind::Unique => "uniq",
            ConstraintKind::Index => "idx",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Derive the name of a constraint or index on `table` from its kind and the identifiers it
/// involves, which are joined in the order given:
///
/// - foreign keys: `[column, referenced table, referenced column]`
/// - unique constraints: `[key column, column]`
/// - indexes: the indexed columns
pub fn derive_constraint_name<S>(kind: ConstraintKind, table: &str, parts: &[S]) -> String
where
    S: AsRef<str>,
{
    let mut name = format!("{kind}_{table}");
    for part in parts {
        name.push('_');
        name.push_str(part.as_ref());
    }
    name
}

/// Name of shard `idx` of a hash-partitioned table
pub fn partition_name(table: &str, idx: u32) -> String {
    format!("{table}_p{idx}")
}
