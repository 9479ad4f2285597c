//! URL and message patterns shared by the traffic recorders.

use crate::error::{E2eError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// A single matching rule against a URL (or message) string.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Exact(String),
    Regex(Regex),
}

impl UrlPattern {
    pub fn contains(s: impl Into<String>) -> Self {
        Self::Contains(s.into())
    }

    pub fn starts_with(s: impl Into<String>) -> Self {
        Self::StartsWith(s.into())
    }

    pub fn ends_with(s: impl Into<String>) -> Self {
        Self::EndsWith(s.into())
    }

    pub fn exact(s: impl Into<String>) -> Self {
        Self::Exact(s.into())
    }

    /// Compile a regular expression pattern.
    pub fn regex(expr: &str) -> Result<Self> {
        Ok(Self::Regex(Regex::new(expr)?))
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Contains(s) => url.contains(s.as_str()),
            Self::StartsWith(s) => url.starts_with(s.as_str()),
            Self::EndsWith(s) => url.ends_with(s.as_str()),
            Self::Exact(s) => url == s,
            Self::Regex(re) => re.is_match(url),
        }
    }
}

impl From<&str> for UrlPattern {
    fn from(s: &str) -> Self {
        Self::Contains(s.to_string())
    }
}

impl From<String> for UrlPattern {
    fn from(s: String) -> Self {
        Self::Contains(s)
    }
}

impl From<Regex> for UrlPattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains(s) => write!(f, "{}", s),
            Self::StartsWith(s) => write!(f, "{}*", s),
            Self::EndsWith(s) => write!(f, "*{}", s),
            Self::Exact(s) => write!(f, "={}", s),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Composite rule object as it appears in JSON fixtures.
///
/// Only the first populated field counts, in the order
/// `contains`, `startsWith`, `endsWith`, `exact`, `regex`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRules {
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub exact: Option<String>,
    pub regex: Option<String>,
}

impl UrlRules {
    /// Collapse to the single rule that decides matching; `None` when empty.
    pub fn first(&self) -> Result<Option<UrlPattern>> {
        let non_empty = |s: &Option<String>| s.clone().filter(|s| !s.is_empty());

        if let Some(s) = non_empty(&self.contains) {
            return Ok(Some(UrlPattern::Contains(s)));
        }
        if let Some(s) = non_empty(&self.starts_with) {
            return Ok(Some(UrlPattern::StartsWith(s)));
        }
        if let Some(s) = non_empty(&self.ends_with) {
            return Ok(Some(UrlPattern::EndsWith(s)));
        }
        if let Some(s) = non_empty(&self.exact) {
            return Ok(Some(UrlPattern::Exact(s)));
        }
        if let Some(s) = non_empty(&self.regex) {
            return Ok(Some(UrlPattern::regex(&s)?));
        }
        Ok(None)
    }

    /// An empty rule object matches nothing.
    pub fn matches(&self, url: &str) -> Result<bool> {
        Ok(self.first()?.map(|p| p.matches(url)).unwrap_or(false))
    }
}

impl TryFrom<UrlRules> for UrlPattern {
    type Error = E2eError;

    fn try_from(rules: UrlRules) -> Result<Self> {
        rules
            .first()?
            .ok_or_else(|| E2eError::Validation("URL rule object has no populated field".to_string()))
    }
}

impl<'de> Deserialize<'de> for UrlPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Plain(String),
            Rules(UrlRules),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Plain(s) => Ok(UrlPattern::Contains(s)),
            Raw::Rules(rules) => UrlPattern::try_from(rules).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_patterns() {
        let url = "https://api.example.com/v1/agent/chat?x=1";
        let cases: Vec<(UrlPattern, bool)> = vec![
            (UrlPattern::contains("agent/chat"), true),
            (UrlPattern::contains("agent/list"), false),
            (UrlPattern::starts_with("https://api."), true),
            (UrlPattern::starts_with("http://api."), false),
            (UrlPattern::ends_with("?x=1"), true),
            (UrlPattern::ends_with("/chat"), false),
            (UrlPattern::exact(url), true),
            (UrlPattern::exact("https://api.example.com"), false),
            (UrlPattern::regex(r"/v\d+/agent").unwrap(), true),
            (UrlPattern::regex(r"^/v1").unwrap(), false),
        ];

        for (pattern, expected) in cases {
            assert_eq!(pattern.matches(url), expected, "pattern {}", pattern);
        }
    }

    #[test]
    fn test_first_populated_field_wins() {
        let rules = UrlRules {
            contains: Some("a".to_string()),
            exact: Some("b".to_string()),
            ..Default::default()
        };
        assert!(rules.matches("a").unwrap());
        assert!(!rules.matches("b").unwrap());

        let rules = UrlRules {
            starts_with: Some("https://".to_string()),
            ends_with: Some(".json".to_string()),
            ..Default::default()
        };
        assert!(rules.matches("https://host/page.html").unwrap());
        assert!(!rules.matches("http://host/data.json").unwrap());
    }

    #[test]
    fn test_empty_rules_match_nothing() {
        let rules = UrlRules::default();
        assert!(!rules.matches("").unwrap());
        assert!(!rules.matches("https://anything").unwrap());
        assert!(UrlPattern::try_from(rules).is_err());
    }

    #[test]
    fn test_deserialize_string_and_object() {
        let plain: UrlPattern = serde_json::from_str(r#""api/foo""#).unwrap();
        assert!(matches!(plain, UrlPattern::Contains(ref s) if s == "api/foo"));

        let object: UrlPattern =
            serde_json::from_str(r#"{"endsWith": "/list", "regex": "^never$"}"#).unwrap();
        assert!(object.matches("https://h/agent/list"));

        let regex: UrlPattern = serde_json::from_str(r#"{"regex": "agent_id=\\d+"}"#).unwrap();
        assert!(regex.matches("https://h/a?agent_id=42"));

        assert!(serde_json::from_str::<UrlPattern>("{}").is_err());
        assert!(serde_json::from_str::<UrlPattern>(r#"{"regex": "("}"#).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(UrlPattern::contains("foo").to_string(), "foo");
        assert_eq!(UrlPattern::regex("a.b").unwrap().to_string(), "/a.b/");
    }
}
