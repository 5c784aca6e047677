use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

fn classify(url: &str, html: &str) -> ClassifierResult {
    classify_document(&KeywordTable::builtin(), url, Some(html))
}

/// Fetcher that counts calls and always returns the same body
struct CountingFetcher {
    calls: AtomicUsize,
    body: &'static str,
}

#[async_trait]
impl PageFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.body.to_string()
    }
}

// ============================================================================
// URL normalization
// ============================================================================

#[test]
fn test_normalize_url_adds_scheme() {
    assert_eq!(normalize_url("example.com/a"), "https://example.com/a");
    assert_eq!(normalize_url("http://example.com"), "http://example.com");
    assert_eq!(normalize_url("https://example.com"), "https://example.com");
}

#[test]
fn test_host_and_domain() {
    let (host, domain) = host_and_domain("https://Sub.Example.co.uk:8080/path");
    assert_eq!(host, "sub.example.co.uk");
    assert_eq!(domain, "example.co.uk");
}

#[test]
fn test_unparsable_url_has_empty_host() {
    let result = classify("https://", "");
    assert_eq!(result.host, "");
    assert_eq!(result.domain, "");
    assert_eq!(result.category, UNCATEGORIZED);
}

// ============================================================================
// Text extraction
// ============================================================================

#[test]
fn test_textify_strips_scripts_styles_and_tags() {
    let html = "<html><head><style>.a{color:red}</style><script>var x = 'porn';</script></head>\
                <body><h1>Hello&nbsp;&amp; World</h1>\n\n<p>Second</p></body></html>";
    assert_eq!(textify(html), "hello & world second");
}

#[test]
fn test_textify_multiline_script() {
    let html = "<SCRIPT type=\"text/javascript\">\nline one\nline two\n</SCRIPT><p>Visible</p>";
    assert_eq!(textify(html), "visible");
}

#[test]
fn test_textify_empty() {
    assert_eq!(textify(""), "");
}

// ============================================================================
// Scoring and priority
// ============================================================================

#[test]
fn test_adult_site_classification() {
    let result = classify("https://www.xvideos.com", "");
    assert_eq!(result.category, "Sexual Content");
    assert!(result.confidence > 0.0);
    assert_eq!(result.host, "www.xvideos.com");
    assert_eq!(result.domain, "xvideos.com");
}

#[test]
fn test_allow_only_wins_unconditionally() {
    let result = classify("https://k12.instructure.com/courses/1", "");
    assert_eq!(result.category, ALLOW_ONLY);
    assert_eq!(result.domain, "instructure.com");

    let result = classify(
        "https://canvas.example.org",
        "<p>roblox roblox minecraft fortnite steam</p>",
    );
    assert_eq!(result.category, ALLOW_ONLY);
}

#[test]
fn test_no_hits_is_uncategorized_with_zero_confidence() {
    let result = classify("https://zzqq.org", "");
    assert_eq!(result.category, UNCATEGORIZED);
    assert!(result.confidence.abs() < f64::EPSILON);
    assert!(!result.confidence.is_nan());
}

#[test]
fn test_edu_domain_boost() {
    let result = classify("https://www.mit.edu", "");
    assert_eq!(result.category, GENERAL_EDUCATION);
    assert!((result.confidence - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_wordpress_paths_boost_blogs() {
    let result = classify("https://zzqq.org/wp-login.php", "");
    assert_eq!(result.category, BLOGS);

    let result = classify("https://zzqq.org/wp-content/uploads/a.png", "");
    assert_eq!(result.category, BLOGS);
}

#[test]
fn test_body_text_contributes_hits() {
    let result = classify("https://www.fortnite.com", "<p>Watch on Netflix</p>");
    assert_eq!(result.category, "Games");
    assert!((result.confidence - 0.75).abs() < f64::EPSILON);
}

#[test]
fn test_ties_go_to_earlier_category() {
    let table = KeywordTable::new(&["Alpha", "Beta"])
        .with_keywords("Beta", &["foo"])
        .with_keywords("Alpha", &["bar"]);
    let result = classify_document(&table, "https://foo-bar.test", None);
    assert_eq!(result.category, "Alpha");
    assert!((result.confidence - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_keywords_are_case_insensitive() {
    let table = KeywordTable::new(&["Shouting"]).with_keywords("Shouting", &["LOUD"]);
    let result = classify_document(&table, "https://loud.example", None);
    assert_eq!(result.category, "Shouting");
}

#[test]
fn test_classification_is_deterministic_with_html() {
    let html = "<p>Play poker and roulette</p>";
    let first = classify("https://games.example.com/lobby", html);
    for _ in 0..5 {
        assert_eq!(classify("https://games.example.com/lobby", html), first);
    }
}

// ============================================================================
// Keyword table
// ============================================================================

#[test]
fn test_builtin_table_covers_category_order() {
    let table = KeywordTable::builtin();
    let names: Vec<&str> = table.categories().collect();
    assert_eq!(names.len(), 23);
    assert_eq!(names[0], "Advertising");
    assert_eq!(table.keywords(ALLOW_ONLY).unwrap().len(), 3);
    assert!(table.keywords(UNCATEGORIZED).unwrap().is_empty());
}

#[test]
fn test_with_keywords_appends_unknown_category() {
    let table = KeywordTable::new(&["A"]).with_keywords("B", &["x"]);
    assert_eq!(table.categories().collect::<Vec<_>>(), vec!["A", "B"]);
}

// ============================================================================
// Async classifier
// ============================================================================

#[tokio::test]
async fn test_supplied_html_skips_fetch() {
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
        body: "<p>casino</p>",
    });
    let classifier = Classifier::new(KeywordTable::builtin(), fetcher.clone());

    let result = classifier.classify("https://zzqq.org", Some("")).await;
    assert_eq!(result.category, UNCATEGORIZED);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_html_is_fetched() {
    let fetcher = Arc::new(CountingFetcher {
        calls: AtomicUsize::new(0),
        body: "<p>casino</p>",
    });
    let classifier = Classifier::new(KeywordTable::builtin(), fetcher.clone());

    let result = classifier.classify("zzqq.org", None).await;
    assert_eq!(result.category, "Gambling");
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_offline_classifier_uses_url_only() {
    let result = Classifier::offline()
        .classify("https://www.xvideos.com", None)
        .await;
    assert_eq!(result.category, "Sexual Content");
}
