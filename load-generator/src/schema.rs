//! The schema model: tables, columns, keys, constraints and indexes, built once from the
//! configuration and immutable afterwards.
//!
//! Tables are declared with `table.<name>=<description>`, in the order their keys appear in the
//! configuration. Each table has columns `<table>.column.<n>` numbered from 1, with per-column
//! properties:
//!
//! - `.type` (required), one of the spellings understood by [`ColumnType`]
//! - `.description`
//! - `.primarykey`, `.notnull`, `.unique` (booleans)
//! - `.foreignkey.table` and optionally `.foreignkey.column`
//!
//! Secondary indexes are declared as `index.<table>.<n>=<column>[,<column>...]`.
//!
//! Every table has exactly one *key* column whose live values are tracked while generating
//! statements: the declared primary key, or column 1 if no primary key was declared.

use data_generator::ColumnType;
use itertools::Itertools;
use tracing::warn;

use crate::config::{Properties, Settings};
use crate::error::{GeneratorError, GeneratorResult};
use crate::naming::{derive_constraint_name, ConstraintKind};

/// Position of a table in the schema's declaration order
pub type TableId = usize;

/// Table names which would make configuration keys ambiguous
const RESERVED_TABLE_NAMES: &[&str] = &["table", "index", "client"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: TableId,
    pub table_name: String,
    /// Always the key column of the referenced table
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub description: Option<String>,
    /// Declared `NOT NULL`
    pub not_null: bool,
    /// Declared unique. Never set on the key column, which is unique anyway.
    pub unique: bool,
    pub foreign_key: Option<ForeignKey>,
}

/// A secondary index, as positions into its table's columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub description: Option<String>,
    pub columns: Vec<Column>,
    pub primary_key: Option<usize>,
    pub indexes: Vec<IndexDefinition>,
    /// Number of hash partitions; 0 for an unpartitioned table
    pub partitions: u32,
    /// Number of seed rows, already scaled
    pub rows: u64,
    /// Percentage of generated values in nullable columns which are not NULL
    pub not_null_percent: u32,
}

impl Table {
    /// Position of the column whose values identify rows
    pub fn key(&self) -> usize {
        self.primary_key.unwrap_or(0)
    }

    pub fn key_column(&self) -> &Column {
        &self.columns[self.key()]
    }

    /// True if no primary key was declared, in which case column 1 gets an index of its own.
    pub fn has_implicit_key(&self) -> bool {
        self.primary_key.is_none()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (usize, &ForeignKey)> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| Some((idx, c.foreign_key.as_ref()?)))
    }

    pub fn has_foreign_keys(&self) -> bool {
        self.foreign_keys().next().is_some()
    }

    /// Whether two live rows may never share a value in this column
    pub fn is_unique(&self, column: usize) -> bool {
        column == self.key() || self.columns[column].unique
    }

    pub fn is_nullable(&self, column: usize) -> bool {
        let c = &self.columns[column];
        !(self.is_unique(column) || c.not_null || c.foreign_key.is_some())
    }

    /// Columns an UPDATE may assign: everything except the key, foreign keys and unique
    /// columns.
    pub fn updatable_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|idx| !self.is_unique(*idx) && self.columns[*idx].foreign_key.is_none())
            .collect()
    }

    /// Columns that get an explicit value in an INSERT, which is all but the serial ones.
    pub fn insert_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|idx| !self.columns[*idx].ty.is_serial())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    tables: Vec<Table>,
    /// For each table, the tables with a foreign key referencing it
    referenced_by: Vec<Vec<TableId>>,
}

fn validate_identifier(name: &str) -> GeneratorResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(GeneratorError::InvalidIdentifier {
            name: name.to_owned(),
            reason: "must match [A-Za-z_][A-Za-z0-9_]*".to_owned(),
        });
    }
    Ok(())
}

fn validate_table_name(name: &str) -> GeneratorResult<()> {
    validate_identifier(name)?;
    if RESERVED_TABLE_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(GeneratorError::InvalidIdentifier {
            name: name.to_owned(),
            reason: "reserved table name".to_owned(),
        });
    }
    Ok(())
}

/// Number of columns declared for `table`, which must be numbered contiguously from 1.
fn column_count(props: &Properties, table: &str) -> GeneratorResult<usize> {
    let prefix = format!("{table}.column.");
    let mut numbers = props
        .with_prefix(&prefix)
        .filter_map(|(suffix, _)| suffix.parse::<usize>().ok())
        .collect::<Vec<_>>();
    numbers.sort_unstable();

    if numbers.is_empty() {
        return Err(GeneratorError::MissingProperty(format!("{prefix}1")));
    }
    for (expected, n) in (1..).zip(&numbers) {
        if *n != expected {
            return Err(GeneratorError::MissingProperty(format!("{prefix}{expected}")));
        }
    }
    Ok(numbers.len())
}

struct TableBuilder<'a> {
    settings: &'a Settings,
    declared: &'a [(String, String)],
    built: &'a [Table],
    name: &'a str,
}

impl<'a> TableBuilder<'a> {
    fn props(&self) -> &'a Properties {
        self.settings.properties()
    }

    fn foreign_key(
        &self,
        column: &str,
        ty: &ColumnType,
        prefix: &str,
    ) -> GeneratorResult<Option<ForeignKey>> {
        let ref_column = self
            .props()
            .get(&format!("{prefix}.foreignkey.column"))
            .map(str::trim);
        let Some(ref_table) = self
            .props()
            .get(&format!("{prefix}.foreignkey.table"))
            .map(str::trim)
        else {
            if ref_column.is_some() {
                return Err(GeneratorError::MissingProperty(format!(
                    "{prefix}.foreignkey.table"
                )));
            }
            return Ok(None);
        };

        let invalid = |reason: String| GeneratorError::InvalidForeignKey {
            table: self.name.to_owned(),
            column: column.to_owned(),
            reason,
        };

        if ref_table == self.name {
            return Err(invalid("a table may not reference itself".to_owned()));
        }
        let Some(id) = self.built.iter().position(|t| t.name == ref_table) else {
            return Err(if self.declared.iter().any(|(n, _)| n == ref_table) {
                GeneratorError::ForwardReference {
                    table: self.name.to_owned(),
                    referenced: ref_table.to_owned(),
                }
            } else {
                GeneratorError::UnknownTable(ref_table.to_owned())
            });
        };

        let referenced = &self.built[id];
        let key = referenced.key_column();
        if let Some(ref_column) = ref_column {
            if ref_column != key.name {
                return Err(invalid(format!(
                    "'{ref_table}.{ref_column}' is not the key column of '{ref_table}' ('{}')",
                    key.name
                )));
            }
        }
        if key.ty.type_tag() != ty.type_tag() {
            return Err(invalid(format!(
                "type '{ty}' does not match '{ref_table}.{}' ('{}')",
                key.name, key.ty
            )));
        }

        Ok(Some(ForeignKey {
            table: id,
            table_name: ref_table.to_owned(),
            column: key.name.clone(),
        }))
    }

    fn build(self, description: &str) -> GeneratorResult<Table> {
        let props = self.props();
        let mut columns: Vec<Column> = vec![];
        let mut primary_key: Option<usize> = None;

        for n in 1..=column_count(props, self.name)? {
            let prefix = format!("{}.column.{n}", self.name);
            let name = props.get(&prefix).unwrap_or_default().trim().to_owned();
            validate_identifier(&name)?;
            if columns.iter().any(|c| c.name == name) {
                return Err(GeneratorError::InvalidIdentifier {
                    name,
                    reason: format!("duplicate column in table '{}'", self.name),
                });
            }

            let type_key = format!("{prefix}.type");
            let ty = props
                .get(&type_key)
                .ok_or_else(|| GeneratorError::MissingProperty(type_key.clone()))?
                .parse::<ColumnType>()
                .map_err(|source| GeneratorError::UnknownType {
                    table: self.name.to_owned(),
                    column: name.clone(),
                    source,
                })?;

            if props
                .get_flag(&format!("{prefix}.primarykey"))?
                .unwrap_or(false)
            {
                if let Some(first) = primary_key {
                    return Err(GeneratorError::DuplicatePrimaryKey {
                        table: self.name.to_owned(),
                        first: columns[first].name.clone(),
                        second: name,
                    });
                }
                primary_key = Some(columns.len());
            }

            let foreign_key = self.foreign_key(&name, &ty, &prefix)?;
            columns.push(Column {
                description: props
                    .get(&format!("{prefix}.description"))
                    .map(str::to_owned)
                    .filter(|d| !d.is_empty()),
                not_null: props.get_flag(&format!("{prefix}.notnull"))?.unwrap_or(false),
                unique: props.get_flag(&format!("{prefix}.unique"))?.unwrap_or(false),
                foreign_key,
                name,
                ty,
            });
        }

        let key = primary_key.unwrap_or(0);
        if let Some((_, column)) = columns
            .iter()
            .enumerate()
            .find(|(idx, c)| c.ty.is_serial() && *idx != key)
        {
            return Err(GeneratorError::SerialMisuse {
                table: self.name.to_owned(),
                column: column.name.clone(),
                ty: column.ty.to_string(),
            });
        }
        if columns[key].foreign_key.is_some() {
            return Err(GeneratorError::InvalidForeignKey {
                table: self.name.to_owned(),
                column: columns[key].name.clone(),
                reason: "a foreign key may not be placed on the key column".to_owned(),
            });
        }
        columns[key].unique = false;

        Ok(Table {
            name: self.name.to_owned(),
            description: Some(description.to_owned()).filter(|d| !d.is_empty()),
            columns,
            primary_key,
            indexes: vec![],
            partitions: self.settings.partitions(self.name)?,
            rows: self.settings.rows(self.name)?,
            not_null_percent: self.settings.not_null_percent(self.name)?,
        })
    }
}

/// Attach every `index.<table>.<n>` declaration to its table, in order of `n`.
fn add_indexes(props: &Properties, tables: &mut [Table]) -> GeneratorResult<()> {
    let mut declared = vec![];
    for (suffix, value) in props.with_prefix("index.") {
        let key = format!("index.{suffix}");
        let (table_name, n) = suffix.rsplit_once('.').ok_or_else(|| {
            GeneratorError::invalid_property(&key, value, "expected 'index.<table>.<n>'")
        })?;
        let n = n
            .parse::<u32>()
            .map_err(|e| GeneratorError::invalid_property(&key, value, e))?;
        let id = tables
            .iter()
            .position(|t| t.name == table_name)
            .ok_or_else(|| GeneratorError::UnknownTable(table_name.to_owned()))?;
        declared.push((id, n, key, value));
    }
    declared.sort_by_key(|(id, n, ..)| (*id, *n));

    for (id, _, key, value) in declared {
        let table = &mut tables[id];
        if value.trim().is_empty() {
            return Err(GeneratorError::invalid_property(
                &key,
                value,
                "an index needs at least one column",
            ));
        }
        let columns = value
            .split(',')
            .map(str::trim)
            .map(|c| {
                table
                    .column_position(c)
                    .ok_or_else(|| GeneratorError::UnknownColumn {
                        table: table.name.clone(),
                        column: c.to_owned(),
                    })
            })
            .collect::<GeneratorResult<Vec<_>>>()?;
        if !columns.iter().all_unique() {
            return Err(GeneratorError::invalid_property(
                &key,
                value,
                "a column is listed more than once",
            ));
        }

        let duplicate = (table.has_implicit_key() && columns == [0])
            || table.indexes.iter().any(|idx| idx.columns == columns);
        if duplicate {
            warn!(table = %table.name, %key, "Skipping duplicate index declaration");
            continue;
        }

        let names = columns
            .iter()
            .map(|c| table.columns[*c].name.as_str())
            .collect::<Vec<_>>();
        let name = derive_constraint_name(ConstraintKind::Index, &table.name, &names);
        table.indexes.push(IndexDefinition { name, columns });
    }

    Ok(())
}

impl Schema {
    /// Build and validate the schema described by the configuration.
    pub fn build(settings: &Settings) -> GeneratorResult<Self> {
        let declared = settings
            .properties()
            .with_prefix("table.")
            .map(|(name, description)| (name.to_owned(), description.trim().to_owned()))
            .collect::<Vec<_>>();
        if declared.is_empty() {
            return Err(GeneratorError::MissingProperty("table.<name>".to_owned()));
        }

        let mut tables: Vec<Table> = Vec::with_capacity(declared.len());
        for (name, description) in &declared {
            validate_table_name(name)?;
            let table = TableBuilder {
                settings,
                declared: &declared,
                built: &tables,
                name,
            }
            .build(description)?;
            tables.push(table);
        }
        add_indexes(settings.properties(), &mut tables)?;

        let mut referenced_by = vec![vec![]; tables.len()];
        for (id, table) in tables.iter().enumerate() {
            for (_, fk) in table.foreign_keys() {
                if !referenced_by[fk.table].contains(&id) {
                    referenced_by[fk.table].push(id);
                }
            }
        }

        Ok(Self {
            tables,
            referenced_by,
        })
    }

    /// All tables, in declaration order
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id]
    }

    pub fn table_id(&self, name: &str) -> Option<TableId> {
        self.tables.iter().position(|t| t.name == name)
    }

    /// Tables with a foreign key referencing `id`
    pub fn referenced_by(&self, id: TableId) -> &[TableId] {
        &self.referenced_by[id]
    }

    /// Rows of a referenced table are never deleted, so that no foreign key is left dangling.
    pub fn is_referenced(&self, id: TableId) -> bool {
        !self.referenced_by[id].is_empty()
    }

    /// Tables in an order where every table comes after the tables it references: first the
    /// tables without foreign keys, then each level of dependents, preserving declaration order
    /// within a level.
    pub fn dependency_order(&self) -> Vec<TableId> {
        let mut depth = vec![0usize; self.tables.len()];
        // References always point at earlier tables, so one pass in declaration order suffices
        for (id, table) in self.tables.iter().enumerate() {
            depth[id] = table
                .foreign_keys()
                .map(|(_, fk)| depth[fk.table] + 1)
                .max()
                .unwrap_or(0);
        }

        let mut order = (0..self.tables.len()).collect::<Vec<_>>();
        order.sort_by_key(|id| depth[*id]);
        order
    }
}
