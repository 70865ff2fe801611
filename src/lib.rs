//! The dependency-solving build orchestration core for the Levitation
//! C++ dialect: a bit-exact manifest codec, a bidirectional declaration
//! dependency graph, a transitive-closure solver, and the task scheduler
//! and phase driver that turn solved dependency order into parse,
//! codegen, and link subprocess invocations.

pub mod codec;
pub mod driver;
pub mod error;
pub mod fsutil;
pub mod graph;
pub mod header;
pub mod manifest;
pub mod parsed_deps;
pub mod solver;
pub mod string_pool;
pub mod tasks;
pub mod unit;

pub use driver::{Driver, DriverConfig, SubprocessToolchain, Toolchain};
pub use error::BuildError;
