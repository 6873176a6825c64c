//! Generation of the seed data script, `data.sql`.

use std::io::Write;

use data_generator::Literal;
use itertools::Itertools;
use rand::Rng;
use tracing::{debug, info};

use crate::error::GeneratorResult;
use crate::row::{generate_row, ValueSource};
use crate::schema::{Schema, Table, TableId};
use crate::state::{ConsistencyState, SEED_CLIENT};

/// Largest number of rows written in a single INSERT statement
pub const MAX_BATCH_ROWS: u64 = 1000;

/// Render one multi-row INSERT of literal values for `rows` of `table`.
///
/// Serial columns are left out so the database assigns them. A table with nothing but a serial
/// column gets one `DEFAULT VALUES` insert per row instead.
pub fn insert_statement(table: &Table, rows: &[Vec<Literal>]) -> String {
    let columns = table.insert_columns();
    if columns.is_empty() {
        return rows
            .iter()
            .map(|_| format!("INSERT INTO {} DEFAULT VALUES;", table.name))
            .join("\n");
    }

    let values = rows
        .iter()
        .map(|row| {
            format!(
                "({})",
                columns
                    .iter()
                    .map(|c| row[*c].to_sql(&table.columns[*c].ty))
                    .join(", ")
            )
        })
        .join(",\n");

    format!(
        "INSERT INTO {} ({}) VALUES\n{values};",
        table.name,
        columns
            .iter()
            .map(|c| table.columns[*c].name.as_str())
            .join(", ")
    )
}

fn seed_table<W, R>(
    schema: &Schema,
    id: TableId,
    state: &mut ConsistencyState,
    max_attempts: u64,
    rng: &mut R,
    out: &mut W,
) -> GeneratorResult<()>
where
    W: Write + ?Sized,
    R: Rng + ?Sized,
{
    let table = schema.table(id);
    let mut row = 0;
    while row < table.rows {
        let count = MAX_BATCH_ROWS.min(table.rows - row);
        let batch = (row..row + count)
            .map(|row| {
                let values = generate_row(
                    schema,
                    id,
                    state,
                    SEED_CLIENT,
                    ValueSource::Seed { row },
                    max_attempts,
                    rng,
                )?;
                state.register_row(table, id, SEED_CLIENT, &values);
                Ok(values)
            })
            .collect::<GeneratorResult<Vec<_>>>()?;

        writeln!(out, "{}", insert_statement(table, &batch))?;
        row += count;
    }
    Ok(())
}

/// Write the seed data script for every table of `schema` to `out`, in dependency order, and
/// register every seeded row as live in `state`.
///
/// Returns the number of rows seeded for each table, in declaration order.
pub fn seed_database<W, R>(
    schema: &Schema,
    state: &mut ConsistencyState,
    max_attempts: u64,
    rng: &mut R,
    out: &mut W,
) -> GeneratorResult<Vec<u64>>
where
    W: Write + ?Sized,
    R: Rng + ?Sized,
{
    let mut seeded = vec![0; schema.tables().len()];

    writeln!(out, "BEGIN;")?;
    for id in schema.dependency_order() {
        let table = schema.table(id);
        if table.rows == 0 {
            debug!(table = %table.name, "No seed rows configured");
            continue;
        }

        info!(table = %table.name, rows = table.rows, "Seeding table");
        seed_table(schema, id, state, max_attempts, rng, out)?;
        seeded[id] = table.rows;
    }
    writeln!(out, "COMMIT;")?;
    writeln!(out, "ANALYZE;")?;

    Ok(seeded)
}
