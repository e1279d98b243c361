mod invocation;
mod message;

pub use invocation::{TaskEmbed, TaskHeaders, TaskInvocation};
pub use message::{MessageProperties, TransportMessage, CONTENT_ENCODING_UTF8, CONTENT_TYPE_JSON};
