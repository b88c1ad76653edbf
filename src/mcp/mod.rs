pub mod engine;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod tools;
pub mod transport;

pub use engine::McpServer;
pub use executor::ToolExecutor;
pub use protocol::*;
pub use registry::{RegistryError, ToolContext, ToolDescriptor, ToolHandler, ToolRegistry};
pub use session::{McpSession, SessionError, SessionRegistry};
pub use transport::{EventStream, Outbound, SseFrame, TransportError, TransportState};
