//! Host-app platforms (Alipay, WeChat) simulated through UA and viewport.

use crate::cdp::{Browser, BrowserContext, ContextOptions, Page, Viewport};
use crate::error::{E2eError, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformConfig {
    pub name: String,
    pub user_agent: String,
    pub viewport: Viewport,
}

impl PlatformConfig {
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            user_agent: Some(self.user_agent.clone()),
            viewport: Some(self.viewport.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformType {
    Alipay,
    Wechat,
    WechatIos,
}

impl PlatformType {
    pub const ALL: [PlatformType; 3] = [Self::Alipay, Self::Wechat, Self::WechatIos];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Alipay => "alipay",
            Self::Wechat => "wechat",
            Self::WechatIos => "wechat-ios",
        }
    }

    pub fn config(&self) -> PlatformConfig {
        let (name, user_agent, width, height) = match self {
            Self::Alipay => (
                "Alipay",
                "Mozilla/5.0 (Linux; U; Android 12; zh-CN; MI 11 Build/SKQ1.211006.001) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/100.0.4896.127 Mobile Safari/537.36 AlipayClient/10.5.0.8150",
                375,
                812,
            ),
            Self::Wechat => (
                "WeChat",
                "Mozilla/5.0 (Linux; Android 12; MI 11 Build/SKQ1.211006.001; wv) AppleWebKit/537.36 (KHTML, like Gecko) Version/4.0 Chrome/100.0.4896.127 Mobile Safari/537.36 MicroMessenger/8.0.38.2400(0x28002657) WeChat/arm64 Weixin NetType/WIFI Language/zh_CN ABI/arm64",
                375,
                812,
            ),
            Self::WechatIos => (
                "WeChat iOS",
                "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 MicroMessenger/8.0.38 NetType/WIFI Language/zh_CN",
                390,
                844,
            ),
        };

        PlatformConfig {
            name: name.to_string(),
            user_agent: user_agent.to_string(),
            viewport: Viewport::new(width, height),
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for PlatformType {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.key() == s)
            .ok_or_else(|| E2eError::Validation(format!("Unknown platform: {}", s)))
    }
}

/// A built-in platform or a caller-supplied configuration.
#[derive(Debug, Clone)]
pub enum PlatformSpec {
    Builtin(PlatformType),
    Custom(PlatformConfig),
}

impl PlatformSpec {
    pub fn resolve(self) -> PlatformConfig {
        match self {
            Self::Builtin(platform) => platform.config(),
            Self::Custom(config) => config,
        }
    }
}

impl From<PlatformType> for PlatformSpec {
    fn from(platform: PlatformType) -> Self {
        Self::Builtin(platform)
    }
}

impl From<PlatformConfig> for PlatformSpec {
    fn from(config: PlatformConfig) -> Self {
        Self::Custom(config)
    }
}

pub struct PlatformPage {
    pub context: BrowserContext,
    pub page: Page,
    pub config: PlatformConfig,
}

/// Creates one isolated context and page per platform and tears them all down together.
pub struct PlatformContext {
    browser: Browser,
    contexts: HashMap<String, BrowserContext>,
    pages: HashMap<String, Page>,
}

impl PlatformContext {
    pub fn new(browser: Browser) -> Self {
        Self {
            browser,
            contexts: HashMap::new(),
            pages: HashMap::new(),
        }
    }

    pub async fn create_platform_page(
        &mut self,
        platform: impl Into<PlatformSpec>,
    ) -> Result<PlatformPage> {
        let config = platform.into().resolve();

        let context = self.browser.new_context(config.context_options()).await?;
        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let _ = context.close().await;
                return Err(e);
            }
        };

        // Stored under the display name; a second page for the same name replaces the first.
        self.contexts.insert(config.name.clone(), context.clone());
        self.pages.insert(config.name.clone(), page.clone());

        tracing::info!("Created {} platform context", config.name);
        Ok(PlatformPage {
            context,
            page,
            config,
        })
    }

    pub fn tracked(&self) -> usize {
        self.contexts.len()
    }

    /// Close every page, then every context. Calling again is a no-op.
    pub async fn cleanup(&mut self) -> Result<()> {
        if self.pages.is_empty() && self.contexts.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        for (_, page) in self.pages.drain() {
            if let Err(e) = page.close().await {
                tracing::warn!("Failed to close platform page: {}", e);
                first_error.get_or_insert(e);
            }
        }
        for (_, context) in self.contexts.drain() {
            if let Err(e) = context.close().await {
                tracing::warn!("Failed to close platform context: {}", e);
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("Cleaned up all platform contexts");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for PlatformContext {
    fn drop(&mut self) {
        if !self.contexts.is_empty() {
            tracing::warn!(
                "PlatformContext dropped with {} live contexts; call cleanup() first",
                self.contexts.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_platforms() {
        let alipay = PlatformType::Alipay.config();
        assert!(alipay.user_agent.contains("AlipayClient/10.5.0.8150"));
        assert_eq!((alipay.viewport.width, alipay.viewport.height), (375, 812));

        let wechat = PlatformType::Wechat.config();
        assert!(wechat.user_agent.contains("MicroMessenger/8.0.38.2400"));
        assert!(wechat.user_agent.contains("Android 12"));

        let ios = PlatformType::WechatIos.config();
        assert!(ios.user_agent.contains("iPhone OS 16_0"));
        assert_eq!((ios.viewport.width, ios.viewport.height), (390, 844));
    }

    #[test]
    fn test_platform_keys_round_trip() {
        for platform in PlatformType::ALL {
            assert_eq!(platform.key().parse::<PlatformType>().unwrap(), platform);
        }
        assert!("h5".parse::<PlatformType>().is_err());
    }

    #[test]
    fn test_custom_spec_passes_through() {
        let custom = PlatformConfig {
            name: "DingTalk".to_string(),
            user_agent: "Mozilla/5.0 DingTalk/7.0".to_string(),
            viewport: Viewport::new(360, 780),
        };
        let resolved = PlatformSpec::from(custom.clone()).resolve();
        assert_eq!(resolved, custom);
        assert_eq!(
            resolved.context_options().user_agent.as_deref(),
            Some("Mozilla/5.0 DingTalk/7.0")
        );
    }
}
