//! Chrome DevTools Protocol client: launching, contexts, pages and elements.

pub mod browser;
pub mod connection;
pub mod element;
pub mod launcher;
pub mod page;

pub use browser::{Browser, BrowserContext};
pub use connection::{CdpConnection, CdpEvent};
pub use element::ElementHandle;
pub use launcher::{allocate_cdp_port, build_command, LaunchOptions};
pub use page::{GotoOptions, LoadState, Navigation, Page, PageEvents, WaitUntil};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_scale")]
    pub device_scale_factor: f64,
    #[serde(default)]
    pub is_mobile: bool,
    #[serde(default)]
    pub has_touch: bool,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            device_scale_factor: 1.0,
            is_mobile: false,
            has_touch: false,
        }
    }

    /// Phone-style viewport: mobile layout and touch enabled.
    pub fn mobile(width: u32, height: u32) -> Self {
        Self {
            is_mobile: true,
            has_touch: true,
            ..Self::new(width, height)
        }
    }
}

fn default_scale() -> f64 {
    1.0
}

/// Emulation applied to every page of a browser context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextOptions {
    pub user_agent: Option<String>,
    pub viewport: Option<Viewport>,
}
