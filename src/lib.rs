//! A small Scheme interpreter with a precise mark-and-sweep collector.
//!
//! Everything lives in a [`eval::Machine`]: three object registries, the
//! global environment, and an explicit frame stack that mirrors the
//! evaluator's recursion so the collector can find every live reference.

pub mod config;
pub mod env;
pub mod error;
pub mod eval;
pub mod forms;
pub mod gc;
pub mod heap;
pub mod primitives;
pub mod printer;
pub mod reader;
pub mod stack;
pub mod symbol;
pub mod value;

pub use config::{GcPolicy, MachineConfig};
pub use error::{SchemeError, SchemeResult};
pub use eval::Machine;

/// Scheme-level helpers loaded by the driver at startup.
pub const STDLIB: &str = include_str!("stdlib.scm");
