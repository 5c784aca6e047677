use gschool_storage::CATEGORY_NAMES;

/// Ordered category -> keyword table. Order decides ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTable {
    entries: Vec<(String, Vec<String>)>,
}

impl KeywordTable {
    /// Table with the given categories in order and no keywords
    #[must_use]
    pub fn new<S: AsRef<str>>(categories: &[S]) -> Self {
        Self {
            entries: categories
                .iter()
                .map(|name| (name.as_ref().to_string(), Vec::new()))
                .collect(),
        }
    }

    /// Add keywords (lowercased) to a category; unknown categories are appended
    #[must_use]
    pub fn with_keywords(mut self, category: &str, keywords: &[&str]) -> Self {
        let lowered = keywords.iter().map(|kw| kw.to_lowercase());
        if let Some((_, existing)) = self.entries.iter_mut().find(|(name, _)| name == category) {
            existing.extend(lowered);
        } else {
            self.entries.push((category.to_string(), lowered.collect()));
        }
        self
    }

    /// Category names in tie-break order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    #[must_use]
    pub fn keywords(&self, category: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, keywords)| keywords.as_slice())
    }

    /// The built-in table over the fixed category enumeration
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(&CATEGORY_NAMES)
            .with_keywords(
                "AI Chatbots & Tools",
                &["chatgpt", "openai", "bard", "claude", "copilot", "perplexity.ai", "writesonic", "midjourney"],
            )
            .with_keywords(
                "Social Media",
                &["tiktok", "instagram", "snapchat", "facebook", "x.com", "twitter", "reddit", "discord", "tumblr", "be.real"],
            )
            .with_keywords(
                "Games",
                &["roblox", "fortnite", "minecraft", "epicgames", "leagueoflegends", "steam", "twitch", "itch.io", "riot games"],
            )
            .with_keywords(
                "Ecommerce",
                &["amazon", "ebay", "walmart", "bestbuy", "aliexpress", "etsy", "shopify", "mercado libre", "target.com"],
            )
            .with_keywords(
                "Streaming Services",
                &["netflix", "spotify", "hulu", "vimeo", "twitch", "soundcloud", "peacocktv", "max.com", "disneyplus"],
            )
            .with_keywords(
                "Sexual Content",
                &["porn", "xxx", "xvideos", "redtube", "xnxx", "brazzers", "onlyfans", "camgirl", "pornhub"],
            )
            .with_keywords(
                "Gambling",
                &["casino", "sportsbook", "bet", "poker", "slot", "roulette", "draftkings", "fanduel"],
            )
            .with_keywords(
                "Illegal, Malicious, or Hacking",
                &["warez", "piratebay", "crack download", "keygen", "free movies streaming", "sql injection", "ddos", "cheat engine"],
            )
            .with_keywords(
                "Drugs & Alcohol",
                &["buy weed", "vape", "nicotine", "delta-8", "kratom", "bong", "vodka", "whiskey", "winery", "brewery"],
            )
            .with_keywords(
                "Collaboration",
                &["gmail", "outlook", "office 365", "onedrive", "teams", "slack", "zoom", "google docs", "google drive", "meet.google"],
            )
            .with_keywords(
                "General / Education",
                &["wikipedia", "news", "encyclopedia", "khan academy", "nasa.gov", ".edu"],
            )
            .with_keywords(
                "Sports & Hobbies",
                &["espn", "nba", "nfl", "mlb", "nhl", "cars", "boats", "aircraft"],
            )
            .with_keywords(
                "App Stores & System Updates",
                &["play.google", "apps.apple", "microsoft store", "firmware update", "drivers download"],
            )
            .with_keywords(
                "Advertising",
                &["ads.txt", "adserver", "doubleclick", "adchoices", "advertising"],
            )
            .with_keywords(
                "Blogs",
                &["wordpress", "blogger", "wattpad", "joomla", "drupal", "medium"],
            )
            .with_keywords(
                "Health & Medicine",
                &["patient portal", "glucose", "fitbit", "apple health", "pharmacy", "telehealth"],
            )
            .with_keywords(
                "Religion",
                &["church", "synagogue", "mosque", "bible study", "quran", "sermon"],
            )
            .with_keywords(
                "Weapons",
                &["knife", "guns", "rifle", "ammo", "silencer", "tactical"],
            )
            .with_keywords(
                "Entertainment",
                &["tv shows", "movies", "anime", "cartoons", "jokes", "memes"],
            )
            .with_keywords("Built-in Apps", &["calculator", "camera", "clock", "files app"])
            .with_keywords("Allow only", &["canvas", "k12", "instructure.com"])
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::builtin()
    }
}
