//! Duplex Types - Native-side object model shared with the script bridge
//!
//! This crate holds the pieces of the object model that do not depend on the
//! script engine: the boundary `Value`, observable properties and lists, and
//! the id slot every bound native object carries.

mod error;
mod id;
mod observable;
mod value;

pub use error::*;
pub use id::*;
pub use observable::*;
pub use value::*;

/// Native objects that hold resources released when the bridge shuts down
///
/// The bridge calls `close` exactly once per registered object, during
/// registry shutdown.
pub trait Closeable {
    fn close(&self) -> anyhow::Result<()>;
}
