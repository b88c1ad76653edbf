pub mod health_checks;
pub mod mcp;

pub use health_checks::*;
pub use mcp::*;
