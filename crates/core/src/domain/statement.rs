use serde::{Deserialize, Serialize};

/// What the model claims a generated statement does. The validator never trusts
/// this on its own; a `Query` claim still has to pass the lexical checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    #[default]
    Query,
    Mutation,
    Ddl,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Ddl => "ddl",
        }
    }
}

impl std::str::FromStr for StatementKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "query" | "read" | "select" => Ok(Self::Query),
            "mutation" | "write" | "dml" => Ok(Self::Mutation),
            "ddl" | "schema" => Ok(Self::Ddl),
            other => Err(format!("unknown statement kind `{other}`")),
        }
    }
}

/// A SQL statement proposed by the language model, not yet trusted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCandidate {
    pub sql: String,
    pub declared_kind: StatementKind,
}

impl SqlCandidate {
    pub fn new(sql: impl Into<String>, declared_kind: StatementKind) -> Self {
        Self { sql: sql.into(), declared_kind }
    }

    pub fn query(sql: impl Into<String>) -> Self {
        Self::new(sql, StatementKind::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::StatementKind;

    #[test]
    fn statement_kind_parses_model_synonyms() {
        assert_eq!("SELECT".parse::<StatementKind>(), Ok(StatementKind::Query));
        assert_eq!(" write ".parse::<StatementKind>(), Ok(StatementKind::Mutation));
        assert_eq!("ddl".parse::<StatementKind>(), Ok(StatementKind::Ddl));
        assert!("vacuum".parse::<StatementKind>().is_err());
    }
}
