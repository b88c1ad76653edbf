//! External Service Connectors
//!
//! Adapters for the external programs this server drives. Tools only ever see the
//! connector traits, so they can be exercised without a real browser.
//!
//! ## Architecture Pattern
//!
//! 1. Define the trait in `{service}/mod.rs` → allows mocking in tests
//! 2. Implement the real client next to it (`{service}/chrome.rs`)
//! 3. Provide a `#[cfg(test)]` mock in `{service}/mock.rs`
//! 4. Inject the trait object at startup → tools never depend on the implementation

pub mod browser;

pub use browser::{BrowserConnector, BrowserError, BrowserHandle, ChromeConnector, PageHandle};
