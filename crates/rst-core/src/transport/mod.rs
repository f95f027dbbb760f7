//! Transport layer module.

pub mod invoker;
pub mod mock;
pub mod traits;
#[cfg(windows)]
pub mod windows;

pub use invoker::{IoctlOutcome, submit};
pub use mock::{MockReply, MockTransport};
pub use traits::{IoStatus, IoctlTransport, TransportError};
#[cfg(windows)]
pub use windows::WindowsTransport;
