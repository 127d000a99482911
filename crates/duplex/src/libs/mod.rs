//! Libraries shipped with the bridge.

mod base;
mod demo;

pub use base::BaseLib;
pub use demo::{Greeter, GREETER_MODULE};

use crate::bridge::Bridge;

/// Define the script sources of the shipped libraries
pub(crate) fn define_builtin_modules(bridge: &Bridge) {
    bridge.define_module(GREETER_MODULE, demo::GREETER_SOURCE);
}
