//! Duplex - Native/script object bridge
//!
//! Pairs native Rust objects with script objects living in an embedded
//! QuickJS engine:
//! - Identity registry mapping one id to both halves of a pair
//! - Type descriptors and per-type binding factories
//! - Two-way property and list synchronization
//! - Module loading and class registration tables

// Re-export the native object model
pub use duplex_types;
pub use duplex_types::{
    Bindable, Closeable, ListChange, NativeRef, ObjectId, ObservableList, Property, TypeKey, Value,
    ValueKind,
};

// Boundary helpers
mod globals;
mod interop;

// Identity and values
pub mod codec;
pub mod registry;

// Descriptors and factories
pub mod descriptor;
pub mod factories;
pub mod factory;

// Synchronization
pub mod sync;

// Engine, bridge and configuration
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod modules;

// Shipped libraries
pub mod libs;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{Bridge, ClassTableReport};
pub use catalog::TypeCatalog;
pub use config::{ClassTable, EngineConfig};
pub use descriptor::{Bound, DescriptorBuilder, DescriptorSummary, TypeDescriptor};
pub use engine::ScriptEngine;
pub use error::{BridgeError, BridgeResult, ConfigError, HandleError};
pub use handle::EngineHandle;
pub use registry::{CloseReport, IdentityRegistry, RootedHandle};
