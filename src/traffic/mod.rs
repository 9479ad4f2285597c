//! Network traffic recorders for a single page.

pub mod http;
pub mod performance;
pub mod websocket;

pub use http::{
    ApiCall, ApiMonitor, ApiMonitorOptions, NamedApiConfig, ResponseBody, ResponseSchema,
};
pub use performance::{NavigationBreakdown, PerformanceMonitor, PerformanceReport};
pub use websocket::{
    ReadyState, WebSocketConnection, WebSocketEvent, WebSocketMonitor, WsEventType,
};
