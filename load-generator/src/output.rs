//! Layout of the per-run output directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GeneratorError, GeneratorResult};
use crate::state::ClientId;

/// The directory every file of a run is written into, named after the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDirectory {
    path: PathBuf,
    profile: String,
}

impl OutputDirectory {
    /// Create (if necessary) the directory `<parent>/<stem of config>`.
    pub fn create(parent: &Path, config: &Path) -> GeneratorResult<Self> {
        let profile = config
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                GeneratorError::invalid_property(
                    "config",
                    config.display().to_string(),
                    "must name a file with a UTF-8 name",
                )
            })?
            .to_owned();

        let path = parent.join(&profile);
        fs::create_dir_all(&path)?;
        Ok(Self { path, profile })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the run, the configuration file's name without its extension
    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn ddl(&self) -> PathBuf {
        self.path.join("ddl.sql")
    }

    pub fn data(&self) -> PathBuf {
        self.path.join("data.sql")
    }

    pub fn client_script(&self, client: ClientId) -> PathBuf {
        self.path.join(format!("{client}.cli"))
    }

    pub fn query_catalog(&self) -> PathBuf {
        self.path
            .join(format!("{}-queryanalyzer.properties", self.profile))
    }
}
