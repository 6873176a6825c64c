use std::fmt;

use crate::ColumnType;

/// A single generated column value, kept in its unescaped textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Literal {
    Null,
    /// Let the database fill in the value (used for serial columns)
    Default,
    Value(String),
}

impl Literal {
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Literal::Default)
    }

    /// Render this value as a SQL literal for a column of the given type, quoting and escaping it
    /// if the type requires it.
    pub fn to_sql(&self, ty: &ColumnType) -> String {
        match self {
            Literal::Null => "NULL".to_owned(),
            Literal::Default => "DEFAULT".to_owned(),
            Literal::Value(v) if ty.needs_quoting() => format!("'{}'", v.replace('\'', "''")),
            Literal::Value(v) => v.clone(),
        }
    }

    /// Render this value the way parameters are written into a client replay script.
    pub fn as_param(&self) -> &str {
        match self {
            Literal::Null => "NULL",
            Literal::Default => "DEFAULT",
            Literal::Value(v) => v,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Value(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Value(v.to_owned())
    }
}
