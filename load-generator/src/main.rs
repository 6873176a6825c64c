use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use load_generator::{LoadGenerator, OutputDirectory, Properties, Settings};
use tracing::info;

fn parse_scale(s: &str) -> Result<f64, String> {
    let scale = s
        .parse::<f64>()
        .map_err(|e| format!("'{s}' is not a number: {e}"))?;
    if !scale.is_finite() || scale < 0.0 {
        return Err(format!("'{s}' is not a non-negative number"));
    }
    Ok(scale)
}

/// Generate a schema, seed data and consistent multi-client SQL workload scripts from a
/// properties file
#[derive(Parser, Debug)]
#[command(name = "sql-load-generator", version)]
struct Options {
    /// Multiplier applied to the configured number of seed rows of every table
    #[arg(short = 's', long, default_value_t = 1.0, value_parser = parse_scale)]
    row_scale: f64,

    /// Multiplier applied to the configured number of statements of every client
    #[arg(short = 't', long, default_value_t = 1.0, value_parser = parse_scale)]
    statement_scale: f64,

    /// Properties file describing the schema and workload
    #[arg(short, long, default_value = "sqlload.properties")]
    config: PathBuf,

    /// Directory to create the run's output directory in. The output directory is named after
    /// the configuration file.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Seed for the random source, overriding the `seed` property. A random seed is picked (and
    /// logged) if neither is given.
    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    logging: loadgen_logging::Options,
}

impl Options {
    fn run(self) -> anyhow::Result<()> {
        info!(config = %self.config.display(), "Loading configuration");
        let properties = Properties::load(&self.config)
            .with_context(|| format!("Failed to read {}", self.config.display()))?;
        let mut settings = Settings::new(properties, self.row_scale, self.statement_scale)
            .context("Invalid configuration")?;
        if let Some(seed) = self.seed {
            settings = settings.with_seed(seed);
        }

        let generator = LoadGenerator::new(settings).context("Invalid configuration")?;
        let output = OutputDirectory::create(&self.output, &self.config).with_context(|| {
            format!(
                "Failed to create output directory in {}",
                self.output.display()
            )
        })?;
        let summary = generator
            .run(&output)
            .with_context(|| format!("Generation into {} failed", output.path().display()))?;

        info!(
            path = %output.path().display(),
            seed = summary.seed,
            clients = summary.clients.len(),
            distinct_statements = summary.distinct_statements,
            "Done"
        );
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    options
        .logging
        .init()
        .context("Failed to initialize logging")?;
    options.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::parse_from(["sql-load-generator"]);
        assert_eq!(options.row_scale, 1.0);
        assert_eq!(options.statement_scale, 1.0);
        assert_eq!(options.config, PathBuf::from("sqlload.properties"));
        assert_eq!(options.output, PathBuf::from("."));
        assert_eq!(options.seed, None);
    }

    #[test]
    fn short_flags() {
        let options = Options::parse_from([
            "sql-load-generator",
            "-s",
            "0.5",
            "-t",
            "2",
            "-c",
            "bench.properties",
            "-o",
            "/tmp/out",
            "--seed",
            "9",
        ]);
        assert_eq!(options.row_scale, 0.5);
        assert_eq!(options.statement_scale, 2.0);
        assert_eq!(options.config, PathBuf::from("bench.properties"));
        assert_eq!(options.output, PathBuf::from("/tmp/out"));
        assert_eq!(options.seed, Some(9));
    }

    #[test]
    fn negative_scales_are_rejected() {
        assert!(Options::try_parse_from(["sql-load-generator", "-s", "-1"]).is_err());
        assert!(Options::try_parse_from(["sql-load-generator", "-t", "many"]).is_err());
    }
}
