//! Agent page fixtures: which domains the suite visits.

use crate::error::{E2eError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub const DOMAIN_FILE_ENV: &str = "TBOX_DOMAIN_FILE";
pub const BASE_ORIGIN_ENV: &str = "TBOX_BASE_ORIGIN";
pub const BASE_URL_ENV: &str = "TBOX_BASE_URL";

const AGENT_PAGE: &str = "/agent.html";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Default agent link
    pub url: String,
    /// Link carrying a preset query; the page sends it as a first message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainsFile {
    pub domains: Vec<DomainConfig>,
}

/// Fixture shipped with the crate.
pub fn default_domain_file() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join("domain.json")
}

/// `TBOX_DOMAIN_FILE` when set (relative to the working directory), else the bundled fixture.
pub fn resolve_domain_file() -> PathBuf {
    match std::env::var(DOMAIN_FILE_ENV) {
        Ok(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            if path.is_absolute() {
                path
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(&path))
                    .unwrap_or(path)
            }
        }
        _ => default_domain_file(),
    }
}

fn base_origin_from_env() -> Option<String> {
    [BASE_ORIGIN_ENV, BASE_URL_ENV]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.is_empty())
}

/// Load the fixture file named by the environment. Failures are fatal for the suite.
pub fn load_domains() -> Result<DomainsFile> {
    load_domains_from(&resolve_domain_file(), base_origin_from_env().as_deref())
}

pub fn load_domains_from(path: &Path, base_origin: Option<&str>) -> Result<DomainsFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        E2eError::DomainFile(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let data: DomainsFile = serde_json::from_str(&raw).map_err(|e| {
        E2eError::DomainFile(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    let Some(base) = base_origin else {
        return Ok(data);
    };
    let base = base.trim_end_matches('/');
    tracing::info!("Overriding domain origin with {}", base);

    Ok(DomainsFile {
        domains: data
            .domains
            .into_iter()
            .map(|domain| DomainConfig {
                url: override_origin(&domain.url, base),
                query_url: domain.query_url.map(|q| override_origin(&q, base)),
                ..domain
            })
            .collect(),
    })
}

/// Swap scheme and host for those of `base`, keeping the query.
///
/// The path keeps everything from `/agent.html` on (or the whole path when absent),
/// prefixed by the base's own path. Unparsable input comes back unchanged.
pub fn override_origin(url: &str, base: &str) -> String {
    let (Ok(base), Ok(mut target)) = (Url::parse(base), Url::parse(url)) else {
        return url.to_string();
    };

    let path = target.path().to_string();
    let suffix = path
        .rfind(AGENT_PAGE)
        .map(|idx| &path[idx..])
        .unwrap_or(path.as_str());
    let base_path = match base.path() {
        "/" => "",
        p => p.trim_end_matches('/'),
    };

    if target.set_scheme(base.scheme()).is_err()
        || target.set_host(base.host_str()).is_err()
        || target.set_port(base.port()).is_err()
    {
        return url.to_string();
    }
    target.set_path(&format!("{}{}", base_path, suffix));
    target.to_string()
}
