pub mod batch;
pub mod event;
pub mod recurrence;
pub mod session;

pub use batch::{BatchPayload, FlushReason, PageMeta};
pub use event::{into_payload, names, DeviceClass, Event, EventContext, Payload, UaInfo};
pub use recurrence::{RecurrenceRecord, VisitorStatus};
pub use session::Session;
