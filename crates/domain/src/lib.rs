pub mod envelope;
pub mod ports;
pub mod protocol;
pub mod result;

pub use envelope::*;
pub use ports::*;
pub use protocol::{decode_invocation, encode_v1, encode_v2, EncodedEnvelope, ProtocolVersion};
pub use result::{ResultRecord, TaskState};
pub use celery_errors::{CeleryError, CeleryResult};
