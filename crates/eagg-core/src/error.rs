use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Function resolution error: {0}")]
    Function(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// A structural assumption of a rewrite did not hold. Rewrites abort
    /// instead of emitting a plan that is no longer equivalent.
    #[error("Internal invariant failed: {0}")]
    Invariant(String),

    /// Error with context chain for better debugging
    #[error("Error in {context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Add context to an error, creating an error chain.
    ///
    /// # Example
    /// ```rust,no_run
    /// use eagg_core::error::Error;
    /// let err = Error::Schema("unknown column".into());
    /// let err = err.with_context("while deriving the join schema");
    /// ```
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self) as Box<dyn std::error::Error + Send + Sync>,
        }
    }

    /// True for errors that signal a bug in a rewrite rather than bad input.
    pub fn is_invariant(&self) -> bool {
        match self {
            Error::Invariant(_) => true,
            Error::Context { source, .. } => source
                .downcast_ref::<Error>()
                .map(Error::is_invariant)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Get suggestions for common errors (e.g., column name suggestions).
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Error::Schema(msg) => {
                if msg.contains("unknown symbol") || msg.contains("column") {
                    vec![
                        "Check that the symbol is spelled correctly".into(),
                        "Verify the symbol is produced by the node's input".into(),
                    ]
                } else {
                    vec![]
                }
            }
            Error::Function(_) => vec![
                "Check the aggregate function name and its argument types".into(),
            ],
            Error::Config(msg) => {
                if msg.contains("whitelist") {
                    vec!["Whitelist entries have the form <join_id>-<child_index>".into()]
                } else {
                    vec![]
                }
            }
            _ => vec![],
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
