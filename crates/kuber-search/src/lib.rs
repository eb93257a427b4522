//! Internet search with a fallback waterfall for finance questions.
//!
//! [`SearchChain::search`] always produces an answer. It tries, in order:
//!
//! 1. the primary [`SearchBackend`] (DuckDuckGo instant answers by default);
//! 2. static guidance for a recognised [`FinanceTopic`];
//! 3. a generic "couldn't find data" message naming the query.
//!
//! Every call first waits a fixed minimum delay as a self-imposed rate
//! limit. The wait is a Tokio sleep, so it never blocks the runtime.

mod backend;
mod chain;
mod config;
mod error;
mod guidance;

pub use backend::{DuckDuckGoBackend, SearchBackend};
pub use chain::{SearchAnswer, SearchChain};
pub use config::SearchConfig;
pub use error::SearchError;
pub use guidance::FinanceTopic;
