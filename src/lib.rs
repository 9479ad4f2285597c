//! End-to-end checks for mobile H5 agent chat pages over the Chrome DevTools Protocol.
//!
//! Test-side helpers (traffic recording, UI stability, platform emulation,
//! chat driving, URL query checks) plus a standalone site monitor.

pub mod attempt;
pub mod cdp;
pub mod chat;
pub mod config;
pub mod domains;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod monitor;
pub mod platform;
pub mod query;
pub mod stability;
pub mod suite;
pub mod traffic;
pub mod util;

pub use attempt::Attempt;
pub use error::{E2eError, Result};
pub use matcher::{UrlPattern, UrlRules};
