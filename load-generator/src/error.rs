use std::io;

use data_generator::UnknownType;
use thiserror::Error;

use crate::state::ClientId;

/// Everything that can abort a generation run.
///
/// Configuration problems are all detected while the schema is being built, before any output
/// file is created. The remaining variants can only come up once generation has started.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Column '{table}.{column}' has an unsupported type")]
    UnknownType {
        table: String,
        column: String,
        #[source]
        source: UnknownType,
    },

    #[error("Table '{table}' declares a duplicate primary key: '{first}' and '{second}'")]
    DuplicatePrimaryKey {
        table: String,
        first: String,
        second: String,
    },

    #[error(
        "Column '{table}.{column}' has serial type '{ty}', which is only allowed on the primary \
         key, or on column 1 of a table without one"
    )]
    SerialMisuse {
        table: String,
        column: String,
        ty: String,
    },

    #[error("Missing required property '{0}'")]
    MissingProperty(String),

    #[error("Invalid value '{value}' for property '{key}': {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Table '{table}' references '{referenced}', which is not declared before it")]
    ForwardReference { table: String, referenced: String },

    #[error("Unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("Invalid foreign key on '{table}.{column}': {reason}")]
    InvalidForeignKey {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Cannot generate rows for '{table}': referenced table '{referenced}' has no live rows")]
    EmptyReferencePool { table: String, referenced: String },

    #[error("Gave up looking for an unused value for '{table}.{column}' after {attempts} attempts")]
    ExhaustedValueSpace {
        table: String,
        column: String,
        attempts: u64,
    },

    #[error("Could not generate a statement for client {client} after {attempts} attempts")]
    NoStatementPossible { client: ClientId, attempts: u32 },

    #[error("Configuration syntax error on line {line}: {reason}")]
    ConfigSyntax { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GeneratorError {
    pub(crate) fn invalid_property<V, R>(key: &str, value: V, reason: R) -> Self
    where
        V: Into<String>,
        R: ToString,
    {
        Self::InvalidProperty {
            key: key.to_owned(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}

pub type GeneratorResult<T> = Result<T, GeneratorError>;
