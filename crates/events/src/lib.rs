//! Turning raw chain artifacts into the typed events users are dispatched.
//!
//! The builder matches each raw item against the chain's event sources,
//! assigns the composite checkpoint, decodes ABI payloads into a typed
//! [`Value`] tree, and synthesizes one setup event per contract ahead of its
//! first real event. Decoding failures become events of their own rather
//! than disappearing.

mod builder;
mod decoder;
mod event;
mod value;

pub use builder::{EventBuilder, EventSource, ExtractedBlock};
pub use decoder::{decode_function_payload, decode_log_payload, DecodeError};
pub use event::{Event, EventKind};
pub use value::Value;
