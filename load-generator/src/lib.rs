//! Generates everything needed to load test a database with a synthetic workload: a schema, seed
//! data for it, and one replay script per simulated client, all described by a properties file.
//!
//! A run writes into one output directory:
//!
//! - `ddl.sql`, creating the tables, constraints and indexes (see [`ddl`])
//! - `data.sql`, loading the seed rows (see [`seed`])
//! - `<client>.cli` for every client, a script of transactions (see [`workload`] and
//!   [`statement`] for the format)
//! - `<profile>-queryanalyzer.properties`, the distinct statements of the run (see [`catalog`])
//!
//! The generator keeps track of which rows exist at every point of the scripts (see [`state`]),
//! so that when the scripts are replayed in order against a freshly loaded database every foreign
//! key, unique constraint and NOT NULL constraint holds. Runs are reproducible: the same
//! configuration and random seed always produce the same files.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use load_generator::{LoadGenerator, OutputDirectory, Properties, Settings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Path::new("sqlload.properties");
//! let settings = Settings::new(Properties::load(config)?, 1.0, 1.0)?;
//! let generator = LoadGenerator::new(settings)?;
//! let summary = generator.run(&OutputDirectory::create(Path::new("."), config)?)?;
//! println!("{} distinct statements", summary.distinct_statements);
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

pub mod catalog;
pub mod config;
pub mod ddl;
pub mod error;
pub mod naming;
pub mod output;
pub mod row;
pub mod schema;
pub mod seed;
pub mod state;
pub mod statement;
pub mod workload;

pub use crate::catalog::QueryCatalog;
pub use crate::config::{Properties, Settings};
pub use crate::error::{GeneratorError, GeneratorResult};
pub use crate::output::OutputDirectory;
pub use crate::schema::Schema;
pub use crate::state::{ClientId, ConsistencyState};
pub use crate::statement::{GeneratedStatement, StatementKind};
pub use crate::workload::{ClientPlan, ClientSummary, WorkloadGenerator};

/// What a run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub seed: u64,
    /// Seed rows per table, in declaration order
    pub seeded_rows: Vec<(String, u64)>,
    pub clients: Vec<ClientSummary>,
    pub distinct_statements: usize,
}

fn create(path: &Path) -> GeneratorResult<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

/// A fully validated generation run
#[derive(Debug)]
pub struct LoadGenerator {
    settings: Settings,
    schema: Schema,
    plans: Vec<ClientPlan>,
    seed: u64,
}

impl LoadGenerator {
    /// Build the schema and resolve every knob of the run, so that configuration errors surface
    /// before any file is written.
    pub fn new(settings: Settings) -> GeneratorResult<Self> {
        let schema = Schema::build(&settings)?;
        settings.version()?;
        settings.unique_retries()?;
        let plans = (1..=settings.clients()?)
            .map(|client| ClientPlan::new(&settings, &schema, client))
            .collect::<GeneratorResult<Vec<_>>>()?;

        let seed = settings.seed().unwrap_or_else(rand::random);
        info!(
            seed,
            tables = schema.tables().len(),
            clients = plans.len(),
            "Generating with random seed"
        );

        Ok(Self {
            settings,
            schema,
            plans,
            seed,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The seed of the random source, which reproduces this run when passed back in
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Write every file of the run into `output`.
    pub fn run(&self, output: &OutputDirectory) -> GeneratorResult<RunSummary> {
        info!(path = %output.path().display(), "Writing output");
        let mut rng = StdRng::seed_from_u64(self.seed);
        let unique_retries = self.settings.unique_retries()?;

        let mut ddl = create(&output.ddl())?;
        for statement in ddl::emit(&self.schema, self.settings.version()?) {
            writeln!(ddl, "{statement}")?;
        }
        ddl.flush()?;

        let mut state = ConsistencyState::new(&self.schema);
        let mut data = create(&output.data())?;
        let seeded =
            seed::seed_database(&self.schema, &mut state, unique_retries, &mut rng, &mut data)?;
        data.flush()?;

        let mut workload = WorkloadGenerator::new(&self.schema, &mut state, &mut rng, unique_retries);
        let mut clients = Vec::with_capacity(self.plans.len());
        for plan in &self.plans {
            let mut script = create(&output.client_script(plan.client))?;
            clients.push(workload.generate_client(plan, &mut script)?);
            script.flush()?;
        }

        let catalog = workload.into_catalog();
        let mut queries = create(&output.query_catalog())?;
        catalog.write_to(&mut queries)?;
        queries.flush()?;
        info!(distinct_statements = catalog.len(), "Wrote query catalog");

        Ok(RunSummary {
            seed: self.seed,
            seeded_rows: self
                .schema
                .tables()
                .iter()
                .zip(seeded)
                .map(|(table, rows)| (table.name.clone(), rows))
                .collect(),
            clients,
            distinct_statements: catalog.len(),
        })
    }
}
