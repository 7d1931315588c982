//! Data source of the tabular executor.
//!
//! `domain` steps (including those of nested `append` / `join` pipelines)
//! load their frame through a [`DomainRetriever`]. Closures implement it
//! directly:
//!
//! ```ignore
//! let retriever = |domain: &str| -> Result<DataFrame, CollaboratorError> {
//!     Ok(DataFrame::from_records(&load(domain)?)?)
//! };
//! ```

use crate::error::CollaboratorError;

use super::DataFrame;

/// Loads the rows of a domain.
pub trait DomainRetriever {
    fn retrieve(&self, domain: &str) -> Result<DataFrame, CollaboratorError>;
}

impl<F> DomainRetriever for F
where
    F: Fn(&str) -> Result<DataFrame, CollaboratorError>,
{
    fn retrieve(&self, domain: &str) -> Result<DataFrame, CollaboratorError> {
        self(domain)
    }
}

/// Domains held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDomains {
    domains: std::collections::HashMap<String, DataFrame>,
}

impl InMemoryDomains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, frame: DataFrame) -> Self {
        self.domains.insert(name.to_string(), frame);
        self
    }
}

impl DomainRetriever for InMemoryDomains {
    fn retrieve(&self, domain: &str) -> Result<DataFrame, CollaboratorError> {
        self.domains
            .get(domain)
            .cloned()
            .ok_or_else(|| format!("unknown domain '{}'", domain).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::FrameExt;
    use serde_json::json;

    #[test]
    fn test_in_memory_domains() {
        let frame = DataFrame::from_records(&[json!({"a": 1})]).unwrap();
        let domains = InMemoryDomains::new().with("sales", frame.clone());
        assert_eq!(domains.retrieve("sales").unwrap().to_records(), frame.to_records());
        let err = domains.retrieve("other").unwrap_err();
        assert_eq!(err.to_string(), "unknown domain 'other'");
    }

    #[test]
    fn test_closure_retriever() {
        let retriever = |_: &str| -> Result<DataFrame, CollaboratorError> { Err("offline".into()) };
        assert!(retriever.retrieve("x").is_err());
    }
}
