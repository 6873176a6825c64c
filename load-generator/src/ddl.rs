//! Rendering of the schema model into the statements of `ddl.sql`.
//!
//! Statements come out in an order the database can execute top to bottom:
//!
//! 1. `DROP TABLE IF EXISTS ... CASCADE` for every table, dependents first
//! 2. for each table: `CREATE TABLE`, its partition shards, comments, and the index on its
//!    implicit key
//! 3. foreign key constraints, then unique constraints
//! 4. secondary indexes

use itertools::Itertools;

use crate::naming::{derive_constraint_name, partition_name, ConstraintKind};
use crate::schema::{Schema, Table, TableId};

/// First engine version with crash-safe hash indexes
pub const MIN_HASH_INDEX_VERSION: u32 = 10;

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Whether an index over `columns` of `table` should use the hash access method.
fn use_hash_index(table: &Table, columns: &[usize], version: u32) -> bool {
    match columns {
        [column] => {
            version >= MIN_HASH_INDEX_VERSION && !table.columns[*column].ty.is_btree_compatible()
        }
        _ => false,
    }
}

fn create_table(table: &Table) -> String {
    let columns = table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let mut def = format!("    {} {}", column.name, column.ty);
            if table.primary_key == Some(idx) {
                def.push_str(" PRIMARY KEY");
            } else if column.not_null {
                def.push_str(" NOT NULL");
            }
            def
        })
        .join(",\n");

    let partitioning = if table.partitions > 0 {
        format!(" PARTITION BY HASH ({})", table.key_column().name)
    } else {
        String::new()
    };

    format!("CREATE TABLE {} (\n{columns}\n){partitioning};", table.name)
}

fn comments(table: &Table) -> impl Iterator<Item = String> + '_ {
    let on_table = table
        .description
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(|d| format!("COMMENT ON TABLE {} IS {};", table.name, quote(d)));
    let on_columns = table.columns.iter().filter_map(|column| {
        let description = column.description.as_deref().filter(|d| !d.is_empty())?;
        Some(format!(
            "COMMENT ON COLUMN {}.{} IS {};",
            table.name,
            column.name,
            quote(description)
        ))
    });
    on_table.into_iter().chain(on_columns)
}

fn create_index(table: &Table, name: &str, columns: &[usize], unique: bool, version: u32) -> String {
    let method = if !unique && use_hash_index(table, columns, version) {
        " USING HASH"
    } else {
        ""
    };
    format!(
        "CREATE {}INDEX {name} ON {}{method} ({});",
        if unique { "UNIQUE " } else { "" },
        table.name,
        columns
            .iter()
            .map(|c| table.columns[*c].name.as_str())
            .join(", ")
    )
}

/// Index over the key column of a table without a declared primary key. It has to be unique if
/// another table's foreign key points at it, which rules out a hash index.
fn implicit_key_index(schema: &Schema, id: TableId, version: u32) -> Option<String> {
    let table = schema.table(id);
    if !table.has_implicit_key() {
        return None;
    }
    let key = table.key();
    let name = derive_constraint_name(
        ConstraintKind::Index,
        &table.name,
        &[table.columns[key].name.as_str()],
    );
    Some(create_index(
        table,
        &name,
        &[key],
        schema.is_referenced(id),
        version,
    ))
}

fn foreign_key_constraints(table: &Table) -> impl Iterator<Item = String> + '_ {
    table.foreign_keys().map(|(idx, fk)| {
        let column = &table.columns[idx].name;
        let name = derive_constraint_name(
            ConstraintKind::ForeignKey,
            &table.name,
            &[column, &fk.table_name, &fk.column],
        );
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {name} FOREIGN KEY ({column}) REFERENCES {} ({});",
            table.name, fk.table_name, fk.column
        )
    })
}

fn unique_constraints(table: &Table) -> impl Iterator<Item = String> + '_ {
    let key = &table.key_column().name;
    table
        .columns
        .iter()
        .filter(|column| column.unique)
        .map(move |column| {
            let name =
                derive_constraint_name(ConstraintKind::Unique, &table.name, &[key, &column.name]);
            // Unique constraints on a partitioned table must include the partition key
            let columns = if table.partitions > 0 {
                format!("{}, {key}", column.name)
            } else {
                column.name.clone()
            };
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {name} UNIQUE ({columns});",
                table.name
            )
        })
}

/// Render the DDL for `schema` targeting the given major version of the database engine.
pub fn emit(schema: &Schema, version: u32) -> Vec<String> {
    let tables = schema.tables();
    let mut statements = tables
        .iter()
        .rev()
        .map(|t| format!("DROP TABLE IF EXISTS {} CASCADE;", t.name))
        .collect::<Vec<_>>();

    for (id, table) in tables.iter().enumerate() {
        statements.push(create_table(table));
        statements.extend((0..table.partitions).map(|i| {
            format!(
                "CREATE TABLE {} PARTITION OF {} FOR VALUES WITH (MODULUS {}, REMAINDER {i});",
                partition_name(&table.name, i),
                table.name,
                table.partitions
            )
        }));
        statements.extend(comments(table));
        statements.extend(implicit_key_index(schema, id, version));
    }

    statements.extend(tables.iter().flat_map(foreign_key_constraints));
    statements.extend(tables.iter().flat_map(unique_constraints));
    statements.extend(tables.iter().flat_map(|table| {
        table
            .indexes
            .iter()
            .map(|idx| create_index(table, &idx.name, &idx.columns, false, version))
    }));

    statements
}
