//! Waiting for a page's DOM to stop changing.

use crate::cdp::Page;
use crate::error::{E2eError, Result};
use serde_json::Value;
use std::time::Duration;

/// Extra command budget on top of `max_wait`, so the in-page ceiling always fires first.
const EVALUATION_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct StabilityOptions {
    /// Quiet period with zero mutations
    pub stable_delay: Duration,
    /// Ceiling regardless of mutation activity
    pub max_wait: Duration,
}

impl Default for StabilityOptions {
    fn default() -> Self {
        Self {
            stable_delay: Duration::from_millis(5000),
            max_wait: Duration::from_millis(15000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityOutcome {
    Stable,
    MaxWaitReached,
}

impl StabilityOutcome {
    fn parse(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some("ui_stable") => Ok(Self::Stable),
            Some("max_wait_time_reached") => Ok(Self::MaxWaitReached),
            _ => Err(E2eError::Evaluation(format!(
                "Unexpected stability result: {}",
                value
            ))),
        }
    }
}

fn observer_script(stable_delay: Duration, max_wait: Duration) -> String {
    format!(
        r#"new Promise((resolve) => {{
            const stableDelay = {stable};
            const maxWait = {max};
            const startTime = Date.now();
            let stableTimer;
            let maxTimer;
            let observer = null;

            const finish = (reason) => {{
                if (observer) {{
                    observer.disconnect();
                    observer = null;
                }}
                clearTimeout(stableTimer);
                clearTimeout(maxTimer);
                resolve(reason);
            }};

            observer = new MutationObserver(() => {{
                if (Date.now() - startTime > maxWait) {{
                    finish('max_wait_time_reached');
                    return;
                }}
                clearTimeout(stableTimer);
                stableTimer = setTimeout(() => finish('ui_stable'), stableDelay);
            }});

            observer.observe(document.body || document.documentElement, {{
                childList: true,
                subtree: true,
                attributes: true,
                characterData: true
            }});

            stableTimer = setTimeout(() => finish('ui_stable'), stableDelay);
            maxTimer = setTimeout(() => finish('max_wait_time_reached'), maxWait);
        }})"#,
        stable = stable_delay.as_millis(),
        max = max_wait.as_millis()
    )
}

/// Resolve once no DOM mutation happened for `stable_delay`, or `max_wait` elapsed.
pub async fn wait_for_ui_stable(page: &Page, options: &StabilityOptions) -> Result<StabilityOutcome> {
    let script = observer_script(options.stable_delay, options.max_wait);
    let value = page
        .evaluate_with_timeout(&script, options.max_wait + EVALUATION_SLACK)
        .await?;
    StabilityOutcome::parse(&value)
}

/// Same as [`wait_for_ui_stable`], logging before and after.
pub async fn wait_for_ui_stable_with_log(
    page: &Page,
    options: &StabilityOptions,
    log_prefix: Option<&str>,
) -> Result<StabilityOutcome> {
    let prefix = log_prefix
        .map(|p| format!("{} ", p))
        .unwrap_or_else(|| "[WaitForUIStable] ".to_string());

    tracing::info!("{}Waiting for UI to settle...", prefix);
    let outcome = wait_for_ui_stable(page, options).await?;

    match outcome {
        StabilityOutcome::Stable => tracing::info!(
            "{}UI stable ({:.1}s without changes)",
            prefix,
            options.stable_delay.as_secs_f64()
        ),
        StabilityOutcome::MaxWaitReached => tracing::info!(
            "{}UI settled (max wait of {:.1}s reached)",
            prefix,
            options.max_wait.as_secs_f64()
        ),
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_outcome() {
        assert_eq!(
            StabilityOutcome::parse(&json!("ui_stable")).unwrap(),
            StabilityOutcome::Stable
        );
        assert_eq!(
            StabilityOutcome::parse(&json!("max_wait_time_reached")).unwrap(),
            StabilityOutcome::MaxWaitReached
        );
        assert!(StabilityOutcome::parse(&Value::Null).is_err());
    }

    #[test]
    fn test_script_embeds_durations() {
        let script = observer_script(Duration::from_millis(200), Duration::from_millis(5000));
        assert!(script.contains("const stableDelay = 200;"));
        assert!(script.contains("const maxWait = 5000;"));
        assert!(script.contains("observer.disconnect()"));
    }

    #[test]
    fn test_defaults() {
        let options = StabilityOptions::default();
        assert_eq!(options.stable_delay, Duration::from_secs(5));
        assert_eq!(options.max_wait, Duration::from_secs(15));
    }
}
