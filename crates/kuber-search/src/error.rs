use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search API returned status {0}")]
    Status(u16),

    #[error("invalid search configuration: {0}")]
    Config(String),
}
