//! Value generation for whole rows, shared by seeding and by generated INSERTs.

use data_generator::{random_value_of_type, unique_value_of_type, Literal};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{GeneratorError, GeneratorResult};
use crate::schema::{ForeignKey, Schema, Table, TableId};
use crate::state::{ClientId, ConsistencyState};

/// Where the values of unique columns come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Bulk seeding: unique columns take the value derived from the row's position, which is
    /// distinct without any retries, and only fall back to random values if the column's type
    /// cannot represent that position.
    Seed { row: u64 },
    /// Uniformly random values, retried until unused
    Random,
}

/// Generate a random value for a column which is neither unique nor a foreign key, honoring the
/// table's NOT NULL percentage if the column is nullable.
pub fn random_column_value<R>(table: &Table, column: usize, rng: &mut R) -> Literal
where
    R: Rng + ?Sized,
{
    if table.is_nullable(column)
        && table.not_null_percent < 100
        && rng.gen_range(0..100) >= table.not_null_percent
    {
        return Literal::Null;
    }
    random_value_of_type(&table.columns[column].ty, rng)
}

/// Pick a value for a foreign key column from the live keys of the referenced table.
fn reference_value<R>(
    (table, id): (&Table, TableId),
    column: usize,
    fk: &ForeignKey,
    state: &mut ConsistencyState,
    client: ClientId,
    max_attempts: u64,
    rng: &mut R,
) -> GeneratorResult<Literal>
where
    R: Rng + ?Sized,
{
    let empty = || GeneratorError::EmptyReferencePool {
        table: table.name.clone(),
        referenced: fk.table_name.clone(),
    };

    if !table.columns[column].unique {
        return state.pick_key(fk.table, client, rng).ok_or_else(empty);
    }

    let pool = state.visible_keys(fk.table, client);
    if pool.is_empty() {
        return Err(empty());
    }
    state.claim_unique(table, id, column, max_attempts, |_| pool.choose(rng).cloned())
}

/// Generate every column value of a new row of table `id`, inserted by `client`.
///
/// Serial columns get the value their sequence will assign, so the returned row is exactly what
/// the database will hold. Values of unique columns are claimed in `state`, and serial sequences
/// are advanced; registering the row as live is left to the caller.
pub fn generate_row<R>(
    schema: &Schema,
    id: TableId,
    state: &mut ConsistencyState,
    client: ClientId,
    source: ValueSource,
    max_attempts: u64,
    rng: &mut R,
) -> GeneratorResult<Vec<Literal>>
where
    R: Rng + ?Sized,
{
    let table = schema.table(id);
    let mut row = Vec::with_capacity(table.columns.len());

    for (idx, column) in table.columns.iter().enumerate() {
        let value = if column.ty.is_serial() {
            state.next_serial(id)
        } else if let Some(fk) = &column.foreign_key {
            reference_value((table, id), idx, fk, state, client, max_attempts, rng)?
        } else if table.is_unique(idx) {
            state.claim_unique(table, id, idx, max_attempts, |attempt| match source {
                ValueSource::Seed { row } if attempt == 0 => unique_value_of_type(&column.ty, row),
                _ => Some(random_value_of_type(&column.ty, &mut *rng)),
            })?
        } else {
            random_column_value(table, idx, rng)
        };
        row.push(value);
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::config::Settings;
    use crate::fixtures::CUSTOMERS_AND_ORDERS;
    use crate::state::SEED_CLIENT;

    fn schema(config: &str) -> Schema {
        Schema::build(&Settings::unscaled(config.parse().unwrap()).unwrap()).unwrap()
    }

    #[test]
    fn serial_keys_follow_the_sequence() {
        let schema = schema(CUSTOMERS_AND_ORDERS);
        let mut state = ConsistencyState::new(&schema);
        let mut rng = StdRng::seed_from_u64(0);
        for expected in 1..=3 {
            let row = generate_row(
                &schema,
                0,
                &mut state,
                SEED_CLIENT,
                ValueSource::Seed { row: expected - 1 },
                10,
                &mut rng,
            )
            .unwrap();
            assert_eq!(row[0], Literal::from(expected.to_string()));
            assert!(!row[1].is_null());
        }
    }

    #[test]
    fn foreign_keys_need_live_rows() {
        let schema = schema(CUSTOMERS_AND_ORDERS);
        let mut state = ConsistencyState::new(&schema);
        let mut rng = StdRng::seed_from_u64(0);
        let err = generate_row(&schema, 1, &mut state, SEED_CLIENT, ValueSource::Random, 10, &mut rng)
            .unwrap_err();
        assert!(matches!(err, GeneratorError::EmptyReferencePool { .. }), "{err}");

        let customer = generate_row(
            &schema,
            0,
            &mut state,
            SEED_CLIENT,
            ValueSource::Random,
            10,
            &mut rng,
        )
        .unwrap();
        state.register_row(schema.table(0), 0, SEED_CLIENT, &customer);
        let order = generate_row(&schema, 1, &mut state, 4, ValueSource::Random, 10, &mut rng)
            .unwrap();
        assert_eq!(order[1], customer[0]);
    }

    #[test]
    fn seeded_unique_values_are_positional() {
        let schema = schema(
            "table.t=\nt.column.1=id\nt.column.1.type=bigint\nt.column.2=code\nt.column.2.type=varchar(4)\nt.column.2.unique=true",
        );
        let mut state = ConsistencyState::new(&schema);
        let mut rng = StdRng::seed_from_u64(0);
        let row = generate_row(
            &schema,
            0,
            &mut state,
            SEED_CLIENT,
            ValueSource::Seed { row: 41 },
            10,
            &mut rng,
        )
        .unwrap();
        assert_eq!(row, vec![Literal::from("42"), Literal::from("15")]);

        // The same position is taken now, so a random value is used instead
        let row = generate_row(
            &schema,
            0,
            &mut state,
            SEED_CLIENT,
            ValueSource::Seed { row: 41 },
            10,
            &mut rng,
        )
        .unwrap();
        assert_ne!(row[0], Literal::from("42"));
        assert_ne!(row[1], Literal::from("15"));
    }

    #[test]
    fn nullable_columns_respect_not_null_percent() {
        let schema = schema(
            "table.t=\nt.notnull=0\nt.column.1=id\nt.column.1.type=int\nt.column.2=a\nt.column.2.type=text\nt.column.3=b\nt.column.3.type=text\nt.column.3.notnull=true",
        );
        let table = schema.table(0);
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            assert!(random_column_value(table, 1, &mut rng).is_null());
            assert!(!random_column_value(table, 2, &mut rng).is_null());
        }
    }
}
