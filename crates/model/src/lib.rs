//! Provider-neutral types for talking to chat models.
//!
//! The agent never speaks a vendor wire format directly. Providers
//! translate these requests into whatever their endpoint expects, and
//! translate the streamed answer back into [`ModelResponseEvent`]s.
//!
//! Every message type here is serializable, so a conversation history
//! can be stored, compared and shipped around without knowing which
//! provider produced it.

#![deny(missing_docs)]

mod error;
mod opaque;
mod provider;
mod request;
mod response;

pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;
