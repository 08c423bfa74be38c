//! Detail levels and the policy that picks one for each outbound call.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// How much of a call's payload and metadata ends up in its analytics event.
///
/// Levels are ordered, `Info < Detailed < Full`. The level never influences correlation or
/// timing, only which optional fields are captured.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsDetailLevel {
    /// URL, method and domain only.
    #[default]
    Info,
    /// Adds headers, options and payloads truncated to 512 characters.
    Detailed,
    /// Adds headers, options and payloads without truncation.
    Full,
}

impl AnalyticsDetailLevel {
    pub fn at_least(self, other: AnalyticsDetailLevel) -> bool {
        self >= other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalyticsDetailLevel::Info => "info",
            AnalyticsDetailLevel::Detailed => "detailed",
            AnalyticsDetailLevel::Full => "full",
        }
    }
}

impl fmt::Display for AnalyticsDetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown analytics detail level `{0}`")]
pub struct ParseLevelError(String);

impl FromStr for AnalyticsDetailLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(AnalyticsDetailLevel::Info),
            "detailed" => Ok(AnalyticsDetailLevel::Detailed),
            "full" => Ok(AnalyticsDetailLevel::Full),
            _ => Err(ParseLevelError(s.to_owned())),
        }
    }
}

/// Exact-match lookup of a detail level by domain.
pub trait DomainFilter: Send + Sync {
    fn level_for(&self, domain: &str) -> Option<AnalyticsDetailLevel>;
}

impl<S: BuildHasher + Send + Sync> DomainFilter for HashMap<String, AnalyticsDetailLevel, S> {
    fn level_for(&self, domain: &str) -> Option<AnalyticsDetailLevel> {
        self.get(domain).copied()
    }
}

impl DomainFilter for BTreeMap<String, AnalyticsDetailLevel> {
    fn level_for(&self, domain: &str) -> Option<AnalyticsDetailLevel> {
        self.get(domain).copied()
    }
}

/// Something a URL can be tested against.
pub trait UrlPattern {
    fn matches(&self, url: &str) -> bool;
}

impl UrlPattern for Regex {
    fn matches(&self, url: &str) -> bool {
        self.is_match(url)
    }
}

/// Ordered `(pattern, level)` rules. Iteration order is priority order.
pub trait UrlFilter: Send + Sync {
    fn rules<'a>(&'a self) -> Box<dyn Iterator<Item = (&'a dyn UrlPattern, AnalyticsDetailLevel)> + 'a>;
}

impl<P> UrlFilter for Vec<(P, AnalyticsDetailLevel)>
where
    P: UrlPattern + Send + Sync,
{
    fn rules<'a>(&'a self) -> Box<dyn Iterator<Item = (&'a dyn UrlPattern, AnalyticsDetailLevel)> + 'a> {
        Box::new(
            self.iter()
                .map(|(pattern, level)| (pattern as &dyn UrlPattern, *level)),
        )
    }
}

/// [`UrlFilter`] over regular expressions, built from string patterns.
#[derive(Debug, Clone, Default)]
pub struct RegexUrlFilter(Vec<(Regex, AnalyticsDetailLevel)>);

impl RegexUrlFilter {
    /// Compile `(pattern, level)` pairs, keeping their order.
    ///
    /// Patterns that fail to compile are logged and skipped, the remaining ones still apply.
    ///
    /// ```
    /// # use reqwest_analytics::{AnalyticsDetailLevel, RegexUrlFilter};
    /// let filter = RegexUrlFilter::from_patterns([
    ///     (r"^https://api\.example\.com/v1/payments", AnalyticsDetailLevel::Full),
    ///     (r"/health$", AnalyticsDetailLevel::Info),
    /// ]);
    /// assert_eq!(filter.len(), 2);
    /// ```
    pub fn from_patterns<Rules, Pattern>(rules: Rules) -> Self
    where
        Rules: IntoIterator<Item = (Pattern, AnalyticsDetailLevel)>,
        Pattern: AsRef<str>,
    {
        let compiled = rules
            .into_iter()
            .filter_map(|(pattern, level)| match Regex::new(pattern.as_ref()) {
                Ok(regex) => Some((regex, level)),
                Err(error) => {
                    warn!(
                        pattern = pattern.as_ref(),
                        error = %error,
                        "Invalid URL filter pattern skipped"
                    );
                    None
                }
            })
            .collect();

        Self(compiled)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl UrlFilter for RegexUrlFilter {
    fn rules<'a>(&'a self) -> Box<dyn Iterator<Item = (&'a dyn UrlPattern, AnalyticsDetailLevel)> + 'a> {
        self.0.rules()
    }
}

/// Decides the detail level of each call from URL rules, domain rules and a default.
pub struct LevelPolicy {
    default_level: AnalyticsDetailLevel,
    domain_filter: Box<dyn DomainFilter>,
    url_filter: Box<dyn UrlFilter>,
}

impl Default for LevelPolicy {
    fn default() -> Self {
        Self {
            default_level: AnalyticsDetailLevel::Info,
            domain_filter: Box::new(HashMap::<String, AnalyticsDetailLevel>::new()),
            url_filter: Box::new(RegexUrlFilter::default()),
        }
    }
}

impl LevelPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_level(mut self, level: AnalyticsDetailLevel) -> Self {
        self.set_default_level(level);
        self
    }

    pub fn with_domain_filter<F: DomainFilter + 'static>(mut self, filter: F) -> Self {
        self.set_domain_filter(filter);
        self
    }

    pub fn with_url_filter<F: UrlFilter + 'static>(mut self, filter: F) -> Self {
        self.set_url_filter(filter);
        self
    }

    pub fn set_default_level(&mut self, level: AnalyticsDetailLevel) {
        self.default_level = level;
    }

    /// Replace the domain rules.
    pub fn set_domain_filter<F: DomainFilter + 'static>(&mut self, filter: F) {
        self.domain_filter = Box::new(filter);
    }

    /// Replace the URL rules.
    pub fn set_url_filter<F: UrlFilter + 'static>(&mut self, filter: F) {
        self.url_filter = Box::new(filter);
    }

    pub fn default_level(&self) -> AnalyticsDetailLevel {
        self.default_level
    }

    /// Resolve the detail level of a call.
    ///
    /// Matching URL rules always win, even over a higher domain rule: the highest level among
    /// them is used, and evaluation stops at the first rule that lifts it to
    /// [`AnalyticsDetailLevel::Full`]. Without a URL match the exact domain rule applies, then
    /// the default.
    ///
    /// ```
    /// # use std::collections::HashMap;
    /// # use reqwest_analytics::{AnalyticsDetailLevel, LevelPolicy, RegexUrlFilter};
    /// let policy = LevelPolicy::new()
    ///     .with_domain_filter(HashMap::from([(
    ///         "api.example.com".to_string(),
    ///         AnalyticsDetailLevel::Full,
    ///     )]))
    ///     .with_url_filter(RegexUrlFilter::from_patterns([(
    ///         "/v1/",
    ///         AnalyticsDetailLevel::Detailed,
    ///     )]));
    ///
    /// let level = policy.resolve("https://api.example.com/v1/users", Some("api.example.com"));
    /// assert_eq!(level, AnalyticsDetailLevel::Detailed);
    /// ```
    pub fn resolve(&self, url: &str, domain: Option<&str>) -> AnalyticsDetailLevel {
        let mut highest = AnalyticsDetailLevel::Info;
        let mut url_filter_matched = false;

        for (pattern, level) in self.url_filter.rules() {
            if !pattern.matches(url) {
                continue;
            }

            highest = highest.max(level);

            if highest == AnalyticsDetailLevel::Full {
                return highest;
            }

            url_filter_matched = true;
        }

        if url_filter_matched {
            return highest;
        }

        domain
            .and_then(|domain| self.domain_filter.level_for(domain))
            .unwrap_or(self.default_level)
    }
}

impl fmt::Debug for LevelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelPolicy")
            .field("default_level", &self.default_level)
            .finish_non_exhaustive()
    }
}
