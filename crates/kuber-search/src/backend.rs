use crate::config::SearchConfig;
use crate::error::SearchError;
use async_trait::async_trait;
use serde::Deserialize;

/// A live search source consulted by the primary tier.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Attribution shown in front of results from this backend.
    fn name(&self) -> &str;

    /// Looks up `query`, returning `Ok(None)` when the source had nothing
    /// useful to say.
    async fn lookup(&self, query: &str) -> Result<Option<String>, SearchError>;
}

/// The subset of the DuckDuckGo instant-answer response we read.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    abstract_text: Option<String>,
    /// Usually a string, occasionally an object for calculator-style answers.
    #[serde(default)]
    answer: serde_json::Value,
    #[serde(default)]
    related_topics: Vec<TextEntry>,
    #[serde(default)]
    results: Vec<TextEntry>,
}

/// Topic groups in `RelatedTopics` carry no `Text` and are skipped.
#[derive(Debug, Default, Deserialize)]
struct TextEntry {
    #[serde(rename = "Text", default)]
    text: Option<String>,
}

/// Maximum related-topic snippets joined into one answer.
const MAX_RELATED_TOPICS: usize = 2;

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

impl InstantAnswer {
    /// Picks the most direct snippet: abstract, then answer, then up to two
    /// related topics, then the first result.
    fn best_snippet(&self) -> Option<String> {
        if let Some(text) = non_empty(self.abstract_text.as_deref()) {
            return Some(text.to_string());
        }

        if let Some(text) = non_empty(self.answer.as_str()) {
            return Some(text.to_string());
        }

        let topics: Vec<&str> = self
            .related_topics
            .iter()
            .filter_map(|t| non_empty(t.text.as_deref()))
            .take(MAX_RELATED_TOPICS)
            .collect();
        if !topics.is_empty() {
            return Some(topics.join(" | "));
        }

        self.results
            .iter()
            .find_map(|r| non_empty(r.text.as_deref()))
            .map(str::to_string)
    }
}

/// Primary search tier backed by the DuckDuckGo instant-answer API.
#[derive(Debug, Clone)]
pub struct DuckDuckGoBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoBackend {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        if config.endpoint.trim().is_empty() {
            return Err(SearchError::Config("search endpoint is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("kuber-search/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoBackend {
    fn name(&self) -> &str {
        "DuckDuckGo"
    }

    async fn lookup(&self, query: &str) -> Result<Option<String>, SearchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let answer: InstantAnswer = response.json().await?;
        Ok(answer.best_snippet())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> InstantAnswer {
        serde_json::from_str(json).expect("fixture should parse")
    }

    #[test]
    fn abstract_text_wins() {
        let answer = parse(
            r#"{"AbstractText": "Gold is a chemical element.", "Answer": "ignored",
                "RelatedTopics": [{"Text": "ignored"}]}"#,
        );
        assert_eq!(
            answer.best_snippet().as_deref(),
            Some("Gold is a chemical element.")
        );
    }

    #[test]
    fn answer_used_when_abstract_empty() {
        let answer = parse(r#"{"AbstractText": "", "Answer": "42"}"#);
        assert_eq!(answer.best_snippet().as_deref(), Some("42"));
    }

    #[test]
    fn non_string_answer_is_skipped() {
        let answer = parse(
            r#"{"AbstractText": "", "Answer": {"from": "calculator"},
                "Results": [{"Text": "first result"}]}"#,
        );
        assert_eq!(answer.best_snippet().as_deref(), Some("first result"));
    }

    #[test]
    fn at_most_two_related_topics_are_joined() {
        let answer = parse(
            r#"{"RelatedTopics": [
                {"Name": "Group", "Topics": [{"Text": "nested"}]},
                {"Text": "Sensex closes higher"},
                {"Text": ""},
                {"Text": "Nifty gains"},
                {"Text": "third topic"}
            ]}"#,
        );
        assert_eq!(
            answer.best_snippet().as_deref(),
            Some("Sensex closes higher | Nifty gains")
        );
    }

    #[test]
    fn empty_response_has_no_snippet() {
        let answer = parse(r#"{"AbstractText": "", "Answer": "", "RelatedTopics": [], "Results": []}"#);
        assert_eq!(answer.best_snippet(), None);
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let config = SearchConfig {
            endpoint: "  ".to_string(),
            ..SearchConfig::default()
        };
        assert!(matches!(
            DuckDuckGoBackend::new(&config),
            Err(SearchError::Config(_))
        ));
    }
}
