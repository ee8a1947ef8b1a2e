// Mockall triggers this warning for every mocked trait. This is fixed in Mockall master but not
// released.
#![cfg_attr(test, allow(clippy::unused_unit))]

#[macro_use]
pub mod macros;

pub mod applier;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod reader;
pub mod sequencer;
pub mod serialization;
pub mod store;
pub mod util;
