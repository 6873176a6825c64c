//! The consistency state store: everything the generator believes about the rows that exist at
//! the current point of the generated script.
//!
//! For every table this tracks
//!
//! - the live key values, partitioned by the client that created them ([`SEED_CLIENT`] for seed
//!   data),
//! - the values ever handed out to unique columns (including the key column),
//! - the next value of the table's serial sequence,
//! - for every secondary index, the indexed values of each live row.
//!
//! While a workload transaction is open every mutation is journaled, so that a generated
//! ROLLBACK can undo exactly what the transaction did. Serial counters are not journaled since
//! sequences are not transactional, and unique values stay claimed, which can only make the
//! generator more conservative.

use std::collections::{BTreeMap, HashSet};

use data_generator::Literal;
use rand::seq::index;
use rand::Rng;
use tracing::warn;

use crate::error::{GeneratorError, GeneratorResult};
use crate::schema::{Schema, Table, TableId};

/// Identifies a simulated client. Client 0 owns the seed data.
pub type ClientId = u32;

pub const SEED_CLIENT: ClientId = 0;

/// Number of attempts after which a uniqueness retry loop gets a warning
const SLOW_RETRY_ATTEMPTS: u64 = 100;

/// The indexed values of one live row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Literal,
    pub values: Vec<Literal>,
}

#[derive(Debug, Default)]
struct TableState {
    active_keys: BTreeMap<ClientId, Vec<Literal>>,
    /// Indexed by column position; only populated for unique columns
    unique_values: BTreeMap<usize, HashSet<Literal>>,
    serial_counter: u64,
    /// Column positions of each secondary index
    index_columns: Vec<Vec<usize>>,
    /// Parallel to `index_columns`
    index_snapshots: Vec<BTreeMap<ClientId, Vec<IndexEntry>>>,
}

#[derive(Debug)]
enum Undo {
    KeyAdded {
        table: TableId,
        client: ClientId,
    },
    KeyRemoved {
        table: TableId,
        client: ClientId,
        position: usize,
        key: Literal,
    },
    EntryAdded {
        table: TableId,
        index: usize,
        client: ClientId,
    },
    EntryRemoved {
        table: TableId,
        index: usize,
        client: ClientId,
        position: usize,
        entry: IndexEntry,
    },
    EntryChanged {
        table: TableId,
        index: usize,
        client: ClientId,
        position: usize,
        values: Vec<Literal>,
    },
}

/// Undo a `swap_remove(position)` which removed `item`
fn unswap_remove<T>(items: &mut Vec<T>, position: usize, item: T) {
    items.push(item);
    let last = items.len() - 1;
    items.swap(position, last);
}

/// Pick an element uniformly from the concatenation of `a` and `b`
fn choose_from_union<'a, T, R>(a: &'a [T], b: &'a [T], rng: &mut R) -> Option<&'a T>
where
    R: Rng + ?Sized,
{
    let len = a.len() + b.len();
    if len == 0 {
        return None;
    }
    let idx = rng.gen_range(0..len);
    a.get(idx).or_else(|| b.get(idx - a.len()))
}

#[derive(Debug)]
pub struct ConsistencyState {
    tables: Vec<TableState>,
    journal: Option<Vec<Undo>>,
}

impl ConsistencyState {
    pub fn new(schema: &Schema) -> Self {
        let tables = schema
            .tables()
            .iter()
            .map(|table| {
                let index_columns = table
                    .indexes
                    .iter()
                    .map(|idx| idx.columns.clone())
                    .collect::<Vec<_>>();
                TableState {
                    index_snapshots: vec![BTreeMap::new(); index_columns.len()],
                    index_columns,
                    unique_values: (0..table.columns.len())
                        .filter(|c| table.is_unique(*c))
                        .map(|c| (c, HashSet::new()))
                        .collect(),
                    ..Default::default()
                }
            })
            .collect();

        Self {
            tables,
            journal: None,
        }
    }

    /// Start journaling mutations for a transaction.
    pub fn begin(&mut self) {
        self.journal = Some(vec![]);
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    /// Keep every mutation made since [`begin`](Self::begin).
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Undo every mutation made since [`begin`](Self::begin), in reverse order.
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };

        for undo in journal.into_iter().rev() {
            match undo {
                Undo::KeyAdded { table, client } => {
                    if let Some(keys) = self.tables[table].active_keys.get_mut(&client) {
                        keys.pop();
                    }
                }
                Undo::KeyRemoved {
                    table,
                    client,
                    position,
                    key,
                } => unswap_remove(
                    self.tables[table].active_keys.entry(client).or_default(),
                    position,
                    key,
                ),
                Undo::EntryAdded {
                    table,
                    index,
                    client,
                } => {
                    if let Some(entries) = self.tables[table].index_snapshots[index].get_mut(&client)
                    {
                        entries.pop();
                    }
                }
                Undo::EntryRemoved {
                    table,
                    index,
                    client,
                    position,
                    entry,
                } => unswap_remove(
                    self.tables[table].index_snapshots[index]
                        .entry(client)
                        .or_default(),
                    position,
                    entry,
                ),
                Undo::EntryChanged {
                    table,
                    index,
                    client,
                    position,
                    values,
                } => {
                    if let Some(entry) = self.tables[table].index_snapshots[index]
                        .get_mut(&client)
                        .and_then(|entries| entries.get_mut(position))
                    {
                        entry.values = values;
                    }
                }
            }
        }
    }

    fn record(&mut self, undo: Undo) {
        if let Some(journal) = &mut self.journal {
            journal.push(undo);
        }
    }

    /// Advance the serial sequence of `table`, returning the value the database will assign to
    /// the next inserted row.
    pub fn next_serial(&mut self, table: TableId) -> Literal {
        let state = &mut self.tables[table];
        state.serial_counter += 1;
        Literal::Value(state.serial_counter.to_string())
    }

    /// Record a newly inserted row of `table`, created by `client`. `row` holds the values of
    /// every column, with serial columns holding the value the sequence will assign.
    pub fn register_row(&mut self, table: &Table, id: TableId, client: ClientId, row: &[Literal]) {
        let key = row[table.key()].clone();
        self.tables[id]
            .active_keys
            .entry(client)
            .or_default()
            .push(key.clone());
        self.record(Undo::KeyAdded { table: id, client });

        for index in 0..self.tables[id].index_columns.len() {
            let values = self.tables[id].index_columns[index]
                .iter()
                .map(|c| row[*c].clone())
                .collect();
            self.tables[id].index_snapshots[index]
                .entry(client)
                .or_default()
                .push(IndexEntry {
                    key: key.clone(),
                    values,
                });
            self.record(Undo::EntryAdded {
                table: id,
                index,
                client,
            });
        }
    }

    /// Live keys of `table` created by `client`
    pub fn keys(&self, table: TableId, client: ClientId) -> &[Literal] {
        self.tables[table]
            .active_keys
            .get(&client)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of live keys of `table`, across all clients
    pub fn live_rows(&self, table: TableId) -> usize {
        self.tables[table].active_keys.values().map(Vec::len).sum()
    }

    /// Pick a live key of `table` that `client` may rely on: one of the seed keys, or one it
    /// created itself.
    pub fn pick_key<R>(&self, table: TableId, client: ClientId, rng: &mut R) -> Option<Literal>
    where
        R: Rng + ?Sized,
    {
        let seed = self.keys(table, SEED_CLIENT);
        let own: &[Literal] = if client == SEED_CLIENT {
            &[]
        } else {
            self.keys(table, client)
        };
        choose_from_union(seed, own, rng).cloned()
    }

    pub fn has_visible_keys(&self, table: TableId, client: ClientId) -> bool {
        !self.keys(table, SEED_CLIENT).is_empty() || !self.keys(table, client).is_empty()
    }

    /// Every live key of `table` that `client` may rely on: the seed keys followed by the keys
    /// it created itself.
    pub fn visible_keys(&self, table: TableId, client: ClientId) -> Vec<Literal> {
        let mut keys = self.keys(table, SEED_CLIENT).to_vec();
        if client != SEED_CLIENT {
            keys.extend_from_slice(self.keys(table, client));
        }
        keys
    }

    /// Pick up to `count` distinct live keys of `table` that `client` may rely on.
    pub fn pick_keys<R>(
        &self,
        table: TableId,
        client: ClientId,
        count: usize,
        rng: &mut R,
    ) -> Vec<Literal>
    where
        R: Rng + ?Sized,
    {
        let seed = self.keys(table, SEED_CLIENT);
        let own: &[Literal] = if client == SEED_CLIENT {
            &[]
        } else {
            self.keys(table, client)
        };
        let len = seed.len() + own.len();
        index::sample(rng, len, count.min(len))
            .into_iter()
            .map(|idx| seed.get(idx).unwrap_or_else(|| &own[idx - seed.len()]).clone())
            .collect()
    }

    /// Pick the indexed values of a live row of `table` for the given index.
    pub fn pick_index_entry<R>(
        &self,
        table: TableId,
        index: usize,
        client: ClientId,
        rng: &mut R,
    ) -> Option<&IndexEntry>
    where
        R: Rng + ?Sized,
    {
        let snapshots = &self.tables[table].index_snapshots[index];
        let entries = move |c: ClientId| snapshots.get(&c).map(Vec::as_slice).unwrap_or_default();
        let own: &[IndexEntry] = if client == SEED_CLIENT {
            &[]
        } else {
            entries(client)
        };
        choose_from_union(entries(SEED_CLIENT), own, rng)
    }

    /// Remove a live key of `table` for `client` to delete, preferring keys the client created
    /// itself and falling back to the seed keys. The key is also removed from every index
    /// snapshot.
    pub fn take_key<R>(&mut self, table: TableId, client: ClientId, rng: &mut R) -> Option<Literal>
    where
        R: Rng + ?Sized,
    {
        let owner = [client, SEED_CLIENT]
            .into_iter()
            .find(|c| !self.keys(table, *c).is_empty())?;
        let keys = self.tables[table].active_keys.get_mut(&owner)?;
        let position = rng.gen_range(0..keys.len());
        let key = keys.swap_remove(position);
        self.record(Undo::KeyRemoved {
            table,
            client: owner,
            position,
            key: key.clone(),
        });

        self.remove_index_entries(table, &key);
        Some(key)
    }

    fn remove_index_entries(&mut self, table: TableId, key: &Literal) {
        let mut removed = vec![];
        for (index, snapshot) in self.tables[table].index_snapshots.iter_mut().enumerate() {
            for (client, entries) in snapshot.iter_mut() {
                if let Some(position) = entries.iter().position(|e| &e.key == key) {
                    let entry = entries.swap_remove(position);
                    removed.push(Undo::EntryRemoved {
                        table,
                        index,
                        client: *client,
                        position,
                        entry,
                    });
                }
            }
        }
        for undo in removed {
            self.record(undo);
        }
    }

    /// Reflect an UPDATE of the row of `table` with the given key in every index snapshot
    /// covering one of the assigned columns.
    pub fn update_row(&mut self, table: TableId, key: &Literal, assignments: &[(usize, Literal)]) {
        let mut changed = vec![];
        let state = &mut self.tables[table];
        for (index, columns) in state.index_columns.iter().enumerate() {
            if !columns.iter().any(|c| assignments.iter().any(|(a, _)| a == c)) {
                continue;
            }
            for (client, entries) in state.index_snapshots[index].iter_mut() {
                let Some(position) = entries.iter().position(|e| &e.key == key) else {
                    continue;
                };
                let entry = &mut entries[position];
                let old = entry.values.clone();
                for (value, column) in entry.values.iter_mut().zip(columns) {
                    if let Some((_, new)) = assignments.iter().find(|(a, _)| a == column) {
                        *value = new.clone();
                    }
                }
                changed.push(Undo::EntryChanged {
                    table,
                    index,
                    client: *client,
                    position,
                    values: old,
                });
            }
        }
        for undo in changed {
            self.record(undo);
        }
    }

    /// Generate a value for a unique column of `table` that has never been used before, and
    /// claim it.
    ///
    /// `candidate` is called with the attempt number until it produces an unclaimed value,
    /// returning `None` for an attempt that could not produce a value at all. Gives up with
    /// [`GeneratorError::ExhaustedValueSpace`] after `max_attempts` attempts, or right away if
    /// every value the column's type can hold has been claimed already.
    pub fn claim_unique<F>(
        &mut self,
        table: &Table,
        id: TableId,
        column: usize,
        max_attempts: u64,
        mut candidate: F,
    ) -> GeneratorResult<Literal>
    where
        F: FnMut(u64) -> Option<Literal>,
    {
        let exhausted = |attempts| GeneratorError::ExhaustedValueSpace {
            table: table.name.clone(),
            column: table.columns[column].name.clone(),
            attempts,
        };
        let claimed = self.tables[id].unique_values.entry(column).or_default();
        if table.columns[column]
            .ty
            .value_space()
            .is_some_and(|space| claimed.len() as u64 >= space)
        {
            return Err(exhausted(0));
        }

        for attempt in 0..max_attempts {
            if attempt == SLOW_RETRY_ATTEMPTS {
                warn!(
                    table = %table.name,
                    column = %table.columns[column].name,
                    claimed = claimed.len(),
                    "Still looking for an unused value"
                );
            }
            if let Some(value) = candidate(attempt) {
                if !value.is_null() && claimed.insert(value.clone()) {
                    return Ok(value);
                }
            }
        }

        Err(exhausted(max_attempts))
    }
}
