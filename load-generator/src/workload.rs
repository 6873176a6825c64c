//! The workload generator, which writes the replay script of each simulated client.
//!
//! A client script is a sequence of transactions. Each transaction holds between 1 and `mspt`
//! statements and ends in a COMMIT or ROLLBACK drawn from the client's commit and rollback
//! weights. For every statement slot a table is picked uniformly, then a statement kind from that
//! table's mix. Statements that make no sense in the current state (deleting from a referenced
//! table, selecting from an empty one, ...) are not errors: the slot is simply retried with a
//! fresh table and kind.
//!
//! All statements read and mutate the [`ConsistencyState`], and the state is journaled per
//! transaction, so every statement is valid when the scripts are replayed one after the other
//! against a database loaded with the seed data.

use std::collections::BTreeMap;
use std::io::Write;

use itertools::Itertools;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::{debug, info};

use crate::catalog::QueryCatalog;
use crate::config::{SelectModes, Settings};
use crate::error::{GeneratorError, GeneratorResult};
use crate::row::{generate_row, random_column_value, ValueSource};
use crate::schema::{Schema, Table, TableId};
use crate::state::{ClientId, ConsistencyState};
use crate::statement::{GeneratedStatement, Record, StatementKind};

/// Consecutive failed attempts after which a statement slot is given up on
pub const MAX_STATEMENT_ATTEMPTS: u32 = 1000;

/// The knobs of one client, resolved once before generation starts.
#[derive(Debug, Clone)]
pub struct ClientPlan {
    pub client: ClientId,
    /// Statement budget, already scaled
    pub statements: u64,
    pub mspt: u64,
    pub commit_weight: u32,
    pub rollback_weight: u32,
    /// Distribution over [`StatementKind::ALL`] for each table, or `None` if no kind has any
    /// weight for it
    kinds: Vec<Option<WeightedIndex<u64>>>,
    select_modes: Vec<SelectModes>,
}

impl ClientPlan {
    pub fn new(settings: &Settings, schema: &Schema, client: ClientId) -> GeneratorResult<Self> {
        let mut kinds = Vec::with_capacity(schema.tables().len());
        let mut select_modes = Vec::with_capacity(schema.tables().len());
        for table in schema.tables() {
            let weights = StatementKind::ALL
                .iter()
                .map(|kind| Ok(u64::from(settings.mix(&table.name, client, *kind)?)))
                .collect::<GeneratorResult<Vec<_>>>()?;
            // The only possible error is every weight being 0
            kinds.push(WeightedIndex::new(weights).ok());
            select_modes.push(settings.select_modes(&table.name)?);
        }

        Ok(Self {
            client,
            statements: settings.statements(client)?,
            mspt: settings.mspt(client)?,
            commit_weight: settings.commit_weight(client)?,
            rollback_weight: settings.rollback_weight(client)?,
            kinds,
            select_modes,
        })
    }

    fn rolls_back<R>(&self, rng: &mut R) -> bool
    where
        R: Rng + ?Sized,
    {
        let total = u64::from(self.commit_weight) + u64::from(self.rollback_weight);
        total > 0 && rng.gen_range(0..total) < u64::from(self.rollback_weight)
    }
}

/// What was generated for one client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSummary {
    pub client: ClientId,
    pub statements: BTreeMap<StatementKind, u64>,
    pub commits: u64,
    pub rollbacks: u64,
}

impl ClientSummary {
    pub fn count(&self, kind: StatementKind) -> u64 {
        self.statements.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_statements(&self) -> u64 {
        self.statements.values().sum()
    }
}

fn column_list(table: &Table) -> String {
    table.columns.iter().map(|c| c.name.as_str()).join(", ")
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).join(", ")
}

pub struct WorkloadGenerator<'a, R> {
    schema: &'a Schema,
    state: &'a mut ConsistencyState,
    rng: R,
    unique_retries: u64,
    catalog: QueryCatalog,
}

impl<'a, R> WorkloadGenerator<'a, R>
where
    R: Rng,
{
    /// `state` must already hold the seed data.
    pub fn new(
        schema: &'a Schema,
        state: &'a mut ConsistencyState,
        rng: R,
        unique_retries: u64,
    ) -> Self {
        Self {
            schema,
            state,
            rng,
            unique_retries,
            catalog: QueryCatalog::new(),
        }
    }

    pub fn into_catalog(self) -> QueryCatalog {
        self.catalog
    }

    /// Write the whole script of the client described by `plan` to `out`.
    pub fn generate_client<W>(
        &mut self,
        plan: &ClientPlan,
        out: &mut W,
    ) -> GeneratorResult<ClientSummary>
    where
        W: Write + ?Sized,
    {
        let mut summary = ClientSummary {
            client: plan.client,
            ..Default::default()
        };

        let mut remaining = plan.statements;
        while remaining > 0 {
            let size = self.rng.gen_range(1..=plan.mspt).min(remaining);

            self.state.begin();
            Record::Begin.write_to(out)?;
            for _ in 0..size {
                let stmt = self.next_statement(plan)?;
                Record::Statement(&stmt).write_to(out)?;
                *summary.statements.entry(stmt.kind).or_default() += 1;
                self.catalog.add(&stmt);
            }

            if plan.rolls_back(&mut self.rng) {
                self.state.rollback();
                Record::Rollback.write_to(out)?;
                summary.rollbacks += 1;
            } else {
                self.state.commit();
                Record::Commit.write_to(out)?;
                summary.commits += 1;
            }
            remaining -= size;
        }

        info!(
            client = plan.client,
            selects = summary.count(StatementKind::Select),
            updates = summary.count(StatementKind::Update),
            inserts = summary.count(StatementKind::Insert),
            deletes = summary.count(StatementKind::Delete),
            commits = summary.commits,
            rollbacks = summary.rollbacks,
            "Generated client script"
        );
        Ok(summary)
    }

    /// Generate the statement for the next slot of the client's script.
    pub fn next_statement(&mut self, plan: &ClientPlan) -> GeneratorResult<GeneratedStatement> {
        let tables = self.schema.tables().len();
        for _ in 0..MAX_STATEMENT_ATTEMPTS {
            let id = self.rng.gen_range(0..tables);
            let Some(kinds) = &plan.kinds[id] else {
                continue;
            };
            let kind = StatementKind::ALL[kinds.sample(&mut self.rng)];
            if let Some(stmt) = self.statement(plan, id, kind)? {
                return Ok(stmt);
            }
        }

        Err(GeneratorError::NoStatementPossible {
            client: plan.client,
            attempts: MAX_STATEMENT_ATTEMPTS,
        })
    }

    /// Generate a statement of the given kind against table `id`, or `None` if no such statement
    /// is possible right now.
    pub fn statement(
        &mut self,
        plan: &ClientPlan,
        id: TableId,
        kind: StatementKind,
    ) -> GeneratorResult<Option<GeneratedStatement>> {
        Ok(match kind {
            StatementKind::Select => self.select(plan, id),
            StatementKind::Update => self.update(plan, id),
            StatementKind::Insert => self.insert(plan.client, id)?,
            StatementKind::Delete => self.delete(plan.client, id),
        })
    }

    fn select(&mut self, plan: &ClientPlan, id: TableId) -> Option<GeneratedStatement> {
        let client = plan.client;
        if self.schema.table(id).has_foreign_keys() {
            return self.select_joined(client, id);
        }

        let modes = plan.select_modes[id];
        let roll = self.rng.gen_range(0..100);
        if roll < modes.by_index {
            if let Some(stmt) = self.select_by_index(client, id) {
                return Some(stmt);
            }
            debug!(
                table = %self.schema.table(id).name,
                client,
                "Nothing to select by index, selecting by key"
            );
        } else if roll < modes.by_index + modes.by_key_list {
            return self.select_by_keys(client, id, modes.max_list_len);
        }

        self.select_by_key(client, id)
    }

    fn select_by_key(&mut self, client: ClientId, id: TableId) -> Option<GeneratedStatement> {
        let table = self.schema.table(id);
        let key = self.state.pick_key(id, client, &mut self.rng)?;

        let key_column = table.key_column();
        let mut stmt = GeneratedStatement::new(
            StatementKind::Select,
            id,
            format!(
                "SELECT {} FROM {} WHERE {} = ?",
                column_list(table),
                table.name,
                key_column.name
            ),
        );
        stmt.bind(key_column.ty.type_tag(), key);
        Some(stmt)
    }

    fn select_by_keys(
        &mut self,
        client: ClientId,
        id: TableId,
        max_list_len: u32,
    ) -> Option<GeneratedStatement> {
        let table = self.schema.table(id);
        let count = self.rng.gen_range(1..=max_list_len) as usize;
        let keys = self.state.pick_keys(id, client, count, &mut self.rng);
        if keys.is_empty() {
            return None;
        }

        let key_column = table.key_column();
        let mut stmt = GeneratedStatement::new(
            StatementKind::Select,
            id,
            format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                column_list(table),
                table.name,
                key_column.name,
                placeholders(keys.len())
            ),
        );
        for key in keys {
            stmt.bind(key_column.ty.type_tag(), key);
        }
        Some(stmt)
    }

    fn select_by_index(&mut self, client: ClientId, id: TableId) -> Option<GeneratedStatement> {
        let table = self.schema.table(id);
        if table.indexes.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..table.indexes.len());
        let entry = self
            .state
            .pick_index_entry(id, index, client, &mut self.rng)?;

        let mut conditions = vec![];
        let mut params = vec![];
        for (column, value) in table.indexes[index].columns.iter().zip(&entry.values) {
            let column = &table.columns[*column];
            if value.is_null() {
                conditions.push(format!("{} IS NULL", column.name));
            } else {
                conditions.push(format!("{} = ?", column.name));
                params.push((column.ty.type_tag(), value.clone()));
            }
        }

        let mut stmt = GeneratedStatement::new(
            StatementKind::Select,
            id,
            format!(
                "SELECT {} FROM {} WHERE {}",
                column_list(table),
                table.name,
                conditions.join(" AND ")
            ),
        );
        for (ty, value) in params {
            stmt.bind(ty, value);
        }
        Some(stmt)
    }

    /// Select a row along with every row it references, in one fixed shape per table.
    fn select_joined(&mut self, client: ClientId, id: TableId) -> Option<GeneratedStatement> {
        let schema = self.schema;
        let table = schema.table(id);
        let key = self.state.pick_key(id, client, &mut self.rng)?;

        let projection = std::iter::once(table)
            .chain(table.foreign_keys().map(|(_, fk)| schema.table(fk.table)))
            .enumerate()
            .flat_map(|(alias, t)| {
                t.columns
                    .iter()
                    .map(move |c| format!("t{alias}.{0} AS t{alias}_{0}", c.name))
            })
            .join(", ");
        let joins = table
            .foreign_keys()
            .enumerate()
            .map(|(i, (column, fk))| {
                format!(
                    " LEFT OUTER JOIN {} t{alias} ON t0.{} = t{alias}.{}",
                    fk.table_name,
                    table.columns[column].name,
                    fk.column,
                    alias = i + 1
                )
            })
            .join("");

        let key_column = table.key_column();
        let mut stmt = GeneratedStatement::new(
            StatementKind::Select,
            id,
            format!(
                "SELECT {projection} FROM {} t0{joins} WHERE t0.{} = ?",
                table.name, key_column.name
            ),
        );
        stmt.bind(key_column.ty.type_tag(), key);
        Some(stmt)
    }

    fn update(&mut self, plan: &ClientPlan, id: TableId) -> Option<GeneratedStatement> {
        let table = self.schema.table(id);
        if table.columns.len() == 1 {
            debug!(table = %table.name, "Nothing to update besides the key, selecting instead");
            return self.select(plan, id);
        }
        let columns = table.updatable_columns();
        if columns.is_empty() {
            debug!(table = %table.name, "Every column is immutable, skipping update");
            return None;
        }
        let key = self.state.pick_key(id, plan.client, &mut self.rng)?;

        let assignments = columns
            .iter()
            .map(|c| (*c, random_column_value(table, *c, &mut self.rng)))
            .collect::<Vec<_>>();

        let key_column = table.key_column();
        let mut stmt = GeneratedStatement::new(
            StatementKind::Update,
            id,
            format!(
                "UPDATE {} SET {} WHERE {} = ?",
                table.name,
                columns
                    .iter()
                    .map(|c| format!("{} = ?", table.columns[*c].name))
                    .join(", "),
                key_column.name
            ),
        );
        for (column, value) in &assignments {
            stmt.bind(table.columns[*column].ty.type_tag(), value.clone());
        }
        stmt.bind(key_column.ty.type_tag(), key.clone());

        self.state.update_row(id, &key, &assignments);
        Some(stmt)
    }

    fn insert(
        &mut self,
        client: ClientId,
        id: TableId,
    ) -> GeneratorResult<Option<GeneratedStatement>> {
        let schema = self.schema;
        let table = schema.table(id);
        // Checked up front, since generating the row advances the serial sequence
        if let Some((_, fk)) = table
            .foreign_keys()
            .find(|(_, fk)| !self.state.has_visible_keys(fk.table, client))
        {
            debug!(
                table = %table.name,
                referenced = %fk.table_name,
                "No rows to reference, skipping insert"
            );
            return Ok(None);
        }

        let row = generate_row(
            schema,
            id,
            self.state,
            client,
            ValueSource::Random,
            self.unique_retries,
            &mut self.rng,
        )?;

        let columns = table.insert_columns();
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table.name)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.name,
                columns
                    .iter()
                    .map(|c| table.columns[*c].name.as_str())
                    .join(", "),
                placeholders(columns.len())
            )
        };
        let mut stmt = GeneratedStatement::new(StatementKind::Insert, id, sql);
        for column in columns {
            stmt.bind(table.columns[column].ty.type_tag(), row[column].clone());
        }

        self.state.register_row(table, id, client, &row);
        Ok(Some(stmt))
    }

    fn delete(&mut self, client: ClientId, id: TableId) -> Option<GeneratedStatement> {
        let table = self.schema.table(id);
        if self.schema.is_referenced(id) {
            debug!(table = %table.name, "Not deleting from a referenced table");
            return None;
        }
        let key = self.state.take_key(id, client, &mut self.rng)?;

        let key_column = table.key_column();
        let mut stmt = GeneratedStatement::new(
            StatementKind::Delete,
            id,
            format!("DELETE FROM {} WHERE {} = ?", table.name, key_column.name),
        );
        stmt.bind(key_column.ty.type_tag(), key);
        Some(stmt)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use data_generator::{Literal, TypeTag};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::fixtures::CUSTOMERS_AND_ORDERS;
    use crate::seed::seed_database;
    use crate::state::SEED_CLIENT;

    struct Harness {
        settings: Settings,
        schema: Schema,
        state: ConsistencyState,
        rng: StdRng,
    }

    impl Harness {
        fn new(config: &str) -> Self {
            let settings = Settings::unscaled(config.parse().unwrap()).unwrap();
            let schema = Schema::build(&settings).unwrap();
            let mut state = ConsistencyState::new(&schema);
            let mut rng = StdRng::seed_from_u64(7);
            seed_database(&schema, &mut state, 100, &mut rng, &mut io::sink()).unwrap();
            Self {
                settings,
                schema,
                state,
                rng,
            }
        }

        fn plan(&self, client: ClientId) -> ClientPlan {
            ClientPlan::new(&self.settings, &self.schema, client).unwrap()
        }

        fn generator(&mut self) -> WorkloadGenerator<'_, &mut StdRng> {
            WorkloadGenerator::new(&self.schema, &mut self.state, &mut self.rng, 100)
        }

        fn statements(&mut self, count: usize) -> GeneratorResult<Vec<GeneratedStatement>> {
            let plan = self.plan(1);
            let mut generator = self.generator();
            (0..count).map(|_| generator.next_statement(&plan)).collect()
        }
    }

    #[test]
    fn select_by_key() {
        let mut harness = Harness::new(
            "rows=5\ntable.t=\nt.column.1=id\nt.column.1.type=int\nt.column.2=a\nt.column.2.type=text",
        );
        for stmt in harness.statements(20).unwrap() {
            assert_eq!(stmt.sql, "SELECT id, a FROM t WHERE id = ?");
            assert_eq!(stmt.types, vec![TypeTag::Int4]);
            assert!(harness.state.keys(0, SEED_CLIENT).contains(&stmt.values[0]));
        }
    }

    #[test]
    fn select_by_null_index_value() {
        let mut harness = Harness::new(
            "rows=5\nmix.select.index=100\ntable.t=\nt.notnull=0\nt.column.1=id\nt.column.1.type=int\nt.column.2=a\nt.column.2.type=int\nindex.t.1=a",
        );
        let stmt = harness.statements(1).unwrap().remove(0);
        assert_eq!(stmt.sql, "SELECT id, a FROM t WHERE a IS NULL");
        assert!(stmt.values.is_empty());
    }

    #[test]
    fn select_by_key_list() {
        let mut harness = Harness::new(
            "rows=5\nmix.select.in=100\nmix.select.in.count=3\ntable.t=\nt.column.1=id\nt.column.1.type=bigint",
        );
        for stmt in harness.statements(20).unwrap() {
            let n = stmt.values.len();
            assert!((1..=3).contains(&n));
            assert_eq!(
                stmt.sql,
                format!("SELECT id FROM t WHERE id IN ({})", placeholders(n))
            );
            assert_eq!(stmt.values.iter().unique().count(), n);
        }
    }

    #[test]
    fn select_with_foreign_keys_joins() {
        let config = format!("rows=3\ncustomers.mix.select=0\n{CUSTOMERS_AND_ORDERS}");
        let mut harness = Harness::new(&config);
        let stmt = harness.statements(1).unwrap().remove(0);
        assert_eq!(
            stmt.sql,
            "SELECT t0.id AS t0_id, t0.customer_id AS t0_customer_id, t0.note AS t0_note, \
             t1.id AS t1_id, t1.name AS t1_name \
             FROM orders t0 LEFT OUTER JOIN customers t1 ON t0.customer_id = t1.id \
             WHERE t0.id = ?"
        );
        assert_eq!(stmt.types, vec![TypeTag::Int4]);
    }

    #[test]
    fn update_assigns_mutable_columns() {
        let mut harness = Harness::new(
            "rows=3\nmix.select=0\nmix.update=100\ntable.t=\nt.column.1=id\nt.column.1.type=int\nt.column.1.primarykey=true\nt.column.2=a\nt.column.2.type=text\nt.column.3=u\nt.column.3.type=int\nt.column.3.unique=true\nt.column.4=b\nt.column.4.type=bigint",
        );
        let stmt = harness.statements(1).unwrap().remove(0);
        assert_eq!(stmt.sql, "UPDATE t SET a = ?, b = ? WHERE id = ?");
        assert_eq!(stmt.types, vec![TypeTag::Text, TypeTag::Int8, TypeTag::Int4]);
    }

    #[test]
    fn update_of_single_column_table_selects() {
        let mut harness = Harness::new(
            "rows=3\nmix.select=0\nmix.update=100\ntable.t=\nt.column.1=id\nt.column.1.type=int",
        );
        let stmt = harness.statements(1).unwrap().remove(0);
        assert_eq!(stmt.kind, StatementKind::Select);
        assert_eq!(stmt.sql, "SELECT id FROM t WHERE id = ?");
    }

    #[test]
    fn updates_move_index_entries() {
        let mut harness = Harness::new(
            "rows=1\nmix.select=0\nmix.update=100\ntable.t=\nt.column.1=id\nt.column.1.type=int\nt.column.2=a\nt.column.2.type=bigint\nt.column.2.notnull=true\nindex.t.1=a",
        );
        let stmt = harness.statements(1).unwrap().remove(0);
        let entry = harness
            .state
            .pick_index_entry(0, 0, SEED_CLIENT, &mut harness.rng)
            .unwrap();
        assert_eq!(entry.values, vec![stmt.values[0].clone()]);
    }

    #[test]
    fn inserts_join_the_clients_pool() {
        let mut harness = Harness::new(
            "rows=2\nmix.select=0\nmix.insert=100\ntable.t=\nt.column.1=id\nt.column.1.type=serial\nt.column.2=a\nt.column.2.type=text",
        );
        let stmt = harness.statements(1).unwrap().remove(0);
        assert_eq!(stmt.sql, "INSERT INTO t (a) VALUES (?)");
        assert_eq!(stmt.types, vec![TypeTag::Text]);
        assert_eq!(harness.state.keys(0, 1), &[Literal::from("3")]);
    }

    #[test]
    fn serial_only_inserts_use_default_values() {
        let mut harness =
            Harness::new("rows=0\nmix.select=0\nmix.insert=100\ntable.t=\nt.column.1=id\nt.column.1.type=serial");
        let stmt = harness.statements(1).unwrap().remove(0);
        assert_eq!(stmt.sql, "INSERT INTO t DEFAULT VALUES");
        assert!(stmt.values.is_empty());
    }

    #[test]
    fn referenced_tables_are_never_deleted_from() {
        let config = format!("rows=10\nmix.select=0\nmix.delete=100\n{CUSTOMERS_AND_ORDERS}");
        let mut harness = Harness::new(&config);
        for stmt in harness.statements(10).unwrap() {
            assert_eq!(stmt.kind, StatementKind::Delete);
            assert_eq!(stmt.sql, "DELETE FROM orders WHERE id = ?");
        }
        assert_eq!(harness.state.live_rows(0), 10);
        assert_eq!(harness.state.live_rows(1), 0);

        let err = harness.statements(1).unwrap_err();
        assert!(
            matches!(err, GeneratorError::NoStatementPossible { client: 1, .. }),
            "{err}"
        );
    }

    #[test]
    fn rolled_back_deletes_are_restored() {
        let mut harness = Harness::new(
            "rows=3\nstatements=20\nmix.select=0\nmix.delete=100\ncommit=0\nrollback=100\ntable.t=\nt.column.1=id\nt.column.1.type=int",
        );
        let plan = harness.plan(1);
        let mut out = vec![];
        let summary = harness
            .generator()
            .generate_client(&plan, &mut out)
            .unwrap();

        assert_eq!(summary.count(StatementKind::Delete), 20);
        assert_eq!(summary.rollbacks, 20);
        assert_eq!(summary.commits, 0);
        assert_eq!(harness.state.live_rows(0), 3);

        let script = String::from_utf8(out).unwrap();
        assert_eq!(script.matches("P\nROLLBACK\n").count(), 20);
        assert!(script.starts_with("P\nBEGIN\n\n\nP\nDELETE FROM t WHERE id = ?\nint4\n"));
    }

    #[test]
    fn transactions_respect_mspt() {
        let mut harness = Harness::new(
            "rows=10\nstatements=50\nmspt=4\ntable.t=\nt.column.1=id\nt.column.1.type=int",
        );
        let plan = harness.plan(1);
        let mut out = vec![];
        let summary = harness
            .generator()
            .generate_client(&plan, &mut out)
            .unwrap();
        assert_eq!(summary.total_statements(), 50);

        let script = String::from_utf8(out).unwrap();
        let mut open = 0;
        for line in script.lines().filter(|l| l.starts_with("SELECT") || *l == "COMMIT") {
            if line == "COMMIT" {
                assert!((1..=4).contains(&open), "{open}");
                open = 0;
            } else {
                open += 1;
            }
        }
        assert_eq!(open, 0);
        assert_eq!(summary.commits, script.matches("P\nCOMMIT\n").count() as u64);
    }

    #[test]
    fn empty_tables_cannot_be_selected_from() {
        let mut harness = Harness::new("rows=0\ntable.t=\nt.column.1=id\nt.column.1.type=int");
        assert!(matches!(
            harness.statements(1),
            Err(GeneratorError::NoStatementPossible { .. })
        ));
    }
}
