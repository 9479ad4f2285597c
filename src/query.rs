//! Query-string assertions over a page's current URL.

use crate::cdp::Page;
use crate::error::{E2eError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use url::Url;

/// Decoded query pairs of one URL, in order, plus its fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    url: String,
    pairs: Vec<(String, String)>,
    hash: String,
}

impl QueryParams {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;
        let pairs = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let hash = parsed
            .fragment()
            .filter(|f| !f.is_empty())
            .map(|f| format!("#{}", f))
            .unwrap_or_default();

        Ok(Self {
            url: url.to_string(),
            pairs,
            hash,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// First value of `key`.
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// One entry per key; a repeated key keeps its last value.
    pub fn get_all_params(&self) -> BTreeMap<String, String> {
        self.pairs.iter().cloned().collect()
    }

    pub fn get_all_param_values(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Fragment including the leading `#`, or empty.
    pub fn get_hash(&self) -> &str {
        &self.hash
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get_param(key).ok_or_else(|| {
            E2eError::Assertion(format!("Query param \"{}\" should exist in {}", key, self.url))
        })
    }

    pub fn expect_param_exists(&self, key: &str) -> Result<()> {
        self.require(key).map(|_| ())
    }

    pub fn expect_param_not_exists(&self, key: &str) -> Result<()> {
        if self.has_param(key) {
            return Err(E2eError::Assertion(format!(
                "Query param \"{}\" should not exist in {}",
                key, self.url
            )));
        }
        Ok(())
    }

    pub fn expect_param_equals(&self, key: &str, expected: &str) -> Result<()> {
        match self.get_param(key) {
            Some(actual) if actual == expected => Ok(()),
            actual => Err(E2eError::Assertion(format!(
                "Query param \"{}\" should be \"{}\", got {:?}",
                key, expected, actual
            ))),
        }
    }

    pub fn expect_param_contains(&self, key: &str, substring: &str) -> Result<()> {
        let value = self.require(key)?;
        if !value.contains(substring) {
            return Err(E2eError::Assertion(format!(
                "Query param \"{}\" value \"{}\" should contain \"{}\"",
                key, value, substring
            )));
        }
        Ok(())
    }

    pub fn expect_param_matches(&self, key: &str, pattern: &Regex) -> Result<()> {
        let value = self.require(key)?;
        if !pattern.is_match(value) {
            return Err(E2eError::Assertion(format!(
                "Query param \"{}\" value \"{}\" should match /{}/",
                key,
                value,
                pattern.as_str()
            )));
        }
        Ok(())
    }

    /// Every listed key has exactly the listed value.
    pub fn expect_params<'a>(
        &self,
        expected: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<()> {
        let all = self.get_all_params();
        let mismatches: Vec<String> = expected
            .into_iter()
            .filter(|(key, value)| all.get(*key).map(String::as_str) != Some(*value))
            .map(|(key, value)| {
                format!(
                    "\"{}\" should be \"{}\", got {:?}",
                    key,
                    value,
                    all.get(key)
                )
            })
            .collect();

        if !mismatches.is_empty() {
            return Err(E2eError::Assertion(format!(
                "Query params mismatch: {}",
                mismatches.join("; ")
            )));
        }
        Ok(())
    }

    pub fn expect_param_count(&self, expected: usize) -> Result<()> {
        let actual = self.get_all_params().len();
        if actual != expected {
            return Err(E2eError::Assertion(format!(
                "Query param count should be {}, got {}",
                expected, actual
            )));
        }
        Ok(())
    }

    pub fn expect_param_is_number(&self, key: &str) -> Result<()> {
        self.numeric(key).map(|_| ())
    }

    pub fn expect_param_in_range(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let n = self.numeric(key)?;
        if n < min || n > max {
            return Err(E2eError::Assertion(format!(
                "Query param \"{}\" value {} should be within [{}, {}]",
                key, n, min, max
            )));
        }
        Ok(())
    }

    /// Accepts true/false/1/0, case-insensitively.
    pub fn expect_param_is_boolean(&self, key: &str) -> Result<()> {
        let value = self.require(key)?;
        let lower = value.to_ascii_lowercase();
        if !["true", "false", "1", "0"].contains(&lower.as_str()) {
            return Err(E2eError::Assertion(format!(
                "Query param \"{}\" value \"{}\" should be a boolean (true/false/1/0)",
                key, value
            )));
        }
        Ok(())
    }

    pub fn expect_hash(&self, expected: &str) -> Result<()> {
        if self.hash != expected {
            return Err(E2eError::Assertion(format!(
                "Hash should be \"{}\", got \"{}\"",
                expected, self.hash
            )));
        }
        Ok(())
    }

    fn numeric(&self, key: &str) -> Result<f64> {
        let value = self.require(key)?;
        parse_number(value).ok_or_else(|| {
            E2eError::Assertion(format!(
                "Query param \"{}\" value \"{}\" should be a number",
                key, value
            ))
        })
    }
}

/// Numeric coercion of a query value: blank reads as zero, words like `inf` do not parse.
/// Unsigned `0x`, `0o` and `0b` literals are read in their radix.
fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    if let Some(radix) = radix_literal(trimmed) {
        return radix;
    }
    match trimmed.trim_start_matches(['+', '-']) {
        "Infinity" => return Some(if trimmed.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY }),
        rest if rest.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => return None,
        _ => {}
    }
    trimmed.parse::<f64>().ok()
}

fn radix_literal(value: &str) -> Option<Option<f64>> {
    let prefix = value.get(..2)?.to_ascii_lowercase();
    let radix = match prefix.as_str() {
        "0x" => 16,
        "0o" => 8,
        "0b" => 2,
        _ => return None,
    };
    let digits = &value[2..];
    if digits.is_empty() || digits.starts_with('+') {
        return Some(None);
    }
    Some(u128::from_str_radix(digits, radix).ok().map(|n| n as f64))
}

/// Query checker bound to a live page; each call reads the current URL.
pub struct UrlQueryChecker {
    page: Page,
}

impl UrlQueryChecker {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub async fn params(&self) -> Result<QueryParams> {
        QueryParams::parse(&self.page.url().await?)
    }

    pub async fn get_param(&self, key: &str) -> Result<Option<String>> {
        Ok(self.params().await?.get_param(key).map(str::to_string))
    }

    pub async fn get_all_params(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.params().await?.get_all_params())
    }

    pub async fn get_all_param_values(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .params()
            .await?
            .get_all_param_values(key)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    pub async fn has_param(&self, key: &str) -> Result<bool> {
        Ok(self.params().await?.has_param(key))
    }

    pub async fn get_hash(&self) -> Result<String> {
        Ok(self.params().await?.get_hash().to_string())
    }

    pub async fn expect_param_exists(&self, key: &str) -> Result<()> {
        self.params().await?.expect_param_exists(key)
    }

    pub async fn expect_param_not_exists(&self, key: &str) -> Result<()> {
        self.params().await?.expect_param_not_exists(key)
    }

    pub async fn expect_param_equals(&self, key: &str, expected: &str) -> Result<()> {
        self.params().await?.expect_param_equals(key, expected)
    }

    pub async fn expect_param_contains(&self, key: &str, substring: &str) -> Result<()> {
        self.params().await?.expect_param_contains(key, substring)
    }

    pub async fn expect_param_matches(&self, key: &str, pattern: &Regex) -> Result<()> {
        self.params().await?.expect_param_matches(key, pattern)
    }

    pub async fn expect_params(&self, expected: &[(&str, &str)]) -> Result<()> {
        self.params().await?.expect_params(expected.iter().copied())
    }

    pub async fn expect_param_count(&self, expected: usize) -> Result<()> {
        self.params().await?.expect_param_count(expected)
    }

    pub async fn expect_param_is_number(&self, key: &str) -> Result<()> {
        self.params().await?.expect_param_is_number(key)
    }

    pub async fn expect_param_in_range(&self, key: &str, min: f64, max: f64) -> Result<()> {
        self.params().await?.expect_param_in_range(key, min, max)
    }

    pub async fn expect_param_is_boolean(&self, key: &str) -> Result<()> {
        self.params().await?.expect_param_is_boolean(key)
    }

    pub async fn expect_hash(&self, expected: &str) -> Result<()> {
        self.params().await?.expect_hash(expected)
    }

    pub async fn log_all_params(&self) -> Result<()> {
        let params = self.params().await?;
        tracing::info!("Current URL: {}", params.url());
        tracing::info!(
            "Query params: {}",
            serde_json::to_string_pretty(&params.get_all_params())?
        );
        Ok(())
    }
}
