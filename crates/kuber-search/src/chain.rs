use crate::backend::{DuckDuckGoBackend, SearchBackend};
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::guidance::FinanceTopic;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The outcome of a search, tagged with the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchAnswer {
    /// A live result from the primary backend.
    Primary { source: String, text: String },
    /// Static guidance for a recognised topic.
    Guidance(FinanceTopic),
    /// Nothing matched.
    NotFound { query: String },
}

impl fmt::Display for SearchAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary { source, text } => write!(f, "Source: {source} - {text}"),
            Self::Guidance(topic) => write!(f, "General guidance: {}", topic.guidance()),
            Self::NotFound { query } => write!(
                f,
                "I couldn't find current data for '{query}'. For the most accurate and \
                 up-to-date information, I recommend checking reliable financial websites \
                 like Economic Times, MoneyControl, or official financial institutions."
            ),
        }
    }
}

/// Three-tier search waterfall: live backend, topic guidance, generic reply.
#[derive(Clone)]
pub struct SearchChain {
    backend: Arc<dyn SearchBackend>,
    min_delay: Duration,
}

impl fmt::Debug for SearchChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchChain")
            .field("backend", &self.backend.name())
            .field("min_delay", &self.min_delay)
            .finish()
    }
}

impl SearchChain {
    pub fn new(backend: Arc<dyn SearchBackend>, min_delay: Duration) -> Self {
        Self { backend, min_delay }
    }

    /// Builds the default chain with DuckDuckGo as the primary tier.
    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        let backend = DuckDuckGoBackend::new(config)?;
        Ok(Self::new(Arc::new(backend), config.min_delay()))
    }

    /// Answers `query`, never failing.
    ///
    /// Each tier runs at most once. A primary-tier error is logged and treated
    /// as "no result".
    pub async fn search(&self, query: &str) -> SearchAnswer {
        tokio::time::sleep(self.min_delay).await;

        info!(query, "searching");

        if !query.trim().is_empty() {
            match self.backend.lookup(query).await {
                Ok(Some(text)) => {
                    return SearchAnswer::Primary {
                        source: self.backend.name().to_string(),
                        text,
                    };
                }
                Ok(None) => {
                    info!(query, backend = self.backend.name(), "primary search had no result");
                }
                Err(e) => {
                    warn!(
                        query,
                        backend = self.backend.name(),
                        error = %e,
                        "primary search failed, falling back"
                    );
                }
            }
        }

        if let Some(topic) = FinanceTopic::classify(query) {
            return SearchAnswer::Guidance(topic);
        }

        SearchAnswer::NotFound {
            query: query.to_string(),
        }
    }
}
