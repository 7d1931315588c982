//! External collaborators of the relational compiler.
//!
//! These are the only I/O boundary of translation. Every call is synchronous
//! and made at most once per step occurrence; failures are wrapped with the
//! step context and never retried. Closures implement the traits directly:
//!
//! ```ignore
//! let retriever = |domain: &str| -> Result<String, CollaboratorError> {
//!     Ok(format!("\"{}\"", domain))
//! };
//! ```

use serde_json::Value as JsonValue;

use crate::error::{CollaboratorError, StepError};

/// Resolves a domain name to a table expression or a sub-select.
pub trait TableRetriever {
    fn retrieve(&self, domain: &str) -> Result<String, CollaboratorError>;
}

/// Reports the result columns (name, SQL type name) of a table or query,
/// in order.
pub trait SchemaDescriber {
    fn describe(&self, source: &str) -> Result<Vec<(String, String)>, CollaboratorError>;
}

/// Runs a query and returns its rows.
pub trait QueryExecutor {
    fn execute(&self, query: &str) -> Result<Vec<Vec<JsonValue>>, CollaboratorError>;
}

impl<F> TableRetriever for F
where
    F: Fn(&str) -> Result<String, CollaboratorError>,
{
    fn retrieve(&self, domain: &str) -> Result<String, CollaboratorError> {
        self(domain)
    }
}

impl<F> SchemaDescriber for F
where
    F: Fn(&str) -> Result<Vec<(String, String)>, CollaboratorError>,
{
    fn describe(&self, source: &str) -> Result<Vec<(String, String)>, CollaboratorError> {
        self(source)
    }
}

impl<F> QueryExecutor for F
where
    F: Fn(&str) -> Result<Vec<Vec<JsonValue>>, CollaboratorError>,
{
    fn execute(&self, query: &str) -> Result<Vec<Vec<JsonValue>>, CollaboratorError> {
        self(query)
    }
}

/// The three collaborators of one translation.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub retriever: &'a dyn TableRetriever,
    pub describer: &'a dyn SchemaDescriber,
    pub executor: &'a dyn QueryExecutor,
}

impl<'a> Collaborators<'a> {
    pub fn retrieve(&self, domain: &str) -> Result<String, StepError> {
        self.retriever.retrieve(domain).map_err(StepError::Collaborator)
    }

    pub fn describe(&self, source: &str) -> Result<Vec<(String, String)>, StepError> {
        self.describer.describe(source).map_err(StepError::Collaborator)
    }

    pub fn execute(&self, query: &str) -> Result<Vec<Vec<JsonValue>>, StepError> {
        self.executor.execute(query).map_err(StepError::Collaborator)
    }
}

impl std::fmt::Debug for Collaborators<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Collaborators { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closures_are_collaborators() {
        let retriever = |domain: &str| -> Result<String, CollaboratorError> {
            Ok(format!("schema.{}", domain))
        };
        let describer = |_: &str| -> Result<Vec<(String, String)>, CollaboratorError> {
            Err("connection refused".into())
        };
        let executor =
            |_: &str| -> Result<Vec<Vec<JsonValue>>, CollaboratorError> { Ok(vec![]) };

        let collaborators = Collaborators {
            retriever: &retriever,
            describer: &describer,
            executor: &executor,
        };

        assert_eq!(collaborators.retrieve("sales").unwrap(), "schema.sales");
        let err = collaborators.describe("x").unwrap_err();
        assert_eq!(err.to_string(), "collaborator failed: connection refused");
        assert!(collaborators.execute("SELECT 1").unwrap().is_empty());
    }
}
