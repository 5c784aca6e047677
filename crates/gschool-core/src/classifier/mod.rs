#[cfg(test)]
mod tests;

mod fetch;
mod keywords;

pub use fetch::{HttpPageFetcher, NoFetch, PageFetcher};
pub use keywords::KeywordTable;

use gschool_storage::{ALLOW_ONLY, BLOGS, GENERAL_EDUCATION, UNCATEGORIZED};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Category assignment for a URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub category: String,
    /// Winner's share of all keyword hits, not a probability
    pub confidence: f64,
    pub domain: String,
    pub host: String,
}

/// Keyword classifier with an injectable page source
/// Priority: "Allow only" hits > highest score > "Uncategorized"
pub struct Classifier {
    table: KeywordTable,
    fetcher: Arc<dyn PageFetcher>,
}

impl Classifier {
    #[must_use]
    pub fn new(table: KeywordTable, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { table, fetcher }
    }

    /// Built-in keyword table, no network access
    #[must_use]
    pub fn offline() -> Self {
        Self::new(KeywordTable::builtin(), Arc::new(NoFetch))
    }

    /// Classify a URL. Supplied `html` is used as-is; otherwise the page is fetched.
    pub async fn classify(&self, url: &str, html: Option<&str>) -> ClassifierResult {
        let fetched;
        let body = if let Some(html) = html {
            html
        } else {
            fetched = self.fetcher.fetch(&normalize_url(url)).await;
            fetched.as_str()
        };
        classify_document(&self.table, url, Some(body))
    }
}

/// Prefix `https://` unless the URL already has an http(s) scheme
#[must_use]
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Host (lowercase, no port) and registrable domain of a normalized URL
#[must_use]
pub fn host_and_domain(normalized: &str) -> (String, String) {
    let host = url::Url::parse(normalized)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_lowercase()))
        .unwrap_or_default();
    let domain = psl::domain_str(&host).map_or_else(|| host.clone(), str::to_string);
    (host, domain)
}

fn replace_all(pattern: &str, text: &str, with: &str) -> String {
    match regex::Regex::new(pattern) {
        Ok(re) => re.replace_all(text, with).into_owned(),
        Err(e) => {
            log::warn!("Invalid text pattern {pattern}: {e}");
            text.to_string()
        }
    }
}

/// Visible text of an HTML page, lowercased with whitespace collapsed
#[must_use]
pub fn textify(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let text = replace_all(r"(?i)<script[\s\S]*?</script>", html, " ");
    let text = replace_all(r"(?i)<style[\s\S]*?</style>", &text, " ");
    let text = replace_all(r"<[^>]+>", &text, " ");
    let text = html_escape::decode_html_entities(&text).into_owned();
    let text = replace_all(r"\s+", &text, " ");
    text.trim().to_lowercase()
}

/// Score `url` (and the page body, when given) against `table`. Pure and deterministic.
#[must_use]
pub fn classify_document(table: &KeywordTable, url: &str, html: Option<&str>) -> ClassifierResult {
    let normalized = normalize_url(url);
    let (host, domain) = host_and_domain(&normalized);

    let mut tokens = vec![normalized.to_lowercase(), host.clone(), domain.clone()];
    let body = html.map(textify).unwrap_or_default();
    if !body.is_empty() {
        tokens.push(body);
    }

    let mut scores: Vec<(&str, u32)> = table
        .entries()
        .iter()
        .map(|(category, keywords)| {
            let hits: usize = keywords
                .iter()
                .map(|kw| tokens.iter().filter(|t| t.contains(kw.as_str())).count())
                .sum();
            (category.as_str(), u32::try_from(hits).unwrap_or(u32::MAX))
        })
        .collect();

    let mut boost = |category: &str, by: u32| {
        if let Some((_, score)) = scores.iter_mut().find(|(name, _)| *name == category) {
            *score += by;
        }
    };
    if domain.ends_with(".edu") {
        boost(GENERAL_EDUCATION, 3);
    }
    if normalized.contains("wp-login") || normalized.contains("/wp-content/") {
        boost(BLOGS, 1);
    }

    let score_of = |category: &str| {
        scores
            .iter()
            .find(|(name, _)| *name == category)
            .map_or(0, |(_, score)| *score)
    };

    let (category, winning) = if score_of(ALLOW_ONLY) > 0 {
        (ALLOW_ONLY, score_of(ALLOW_ONLY))
    } else {
        // First strictly-highest score wins, so ties go to the earlier category
        let (best, best_score) = scores
            .iter()
            .fold((UNCATEGORIZED, 0), |(best, best_score), &(name, score)| {
                if score > best_score {
                    (name, score)
                } else {
                    (best, best_score)
                }
            });
        if best_score == 0 {
            (UNCATEGORIZED, 0)
        } else {
            (best, best_score)
        }
    };

    let total: u32 = scores.iter().map(|(_, score)| score).sum();
    let confidence = f64::from(winning) / f64::from(total.max(1));

    log::debug!("Classified {url} as '{category}' (confidence {confidence:.2})");

    ClassifierResult {
        category: category.to_string(),
        confidence,
        domain,
        host,
    }
}
