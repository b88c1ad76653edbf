pub mod messages;
pub mod sse;

pub use messages::{message_handler, MessageError, MAXIMUM_MESSAGE_SIZE};
pub use sse::{sse_handler, MESSAGES_PATH};
