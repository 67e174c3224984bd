pub mod buffer;
pub mod kv;
pub mod recurrence;

pub use buffer::StoredBuffer;
