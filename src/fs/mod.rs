//! File System Module
//!
//! Provides filesystem abstractions for the interpreter's capability
//! bundle. Two implementations:
//! - InMemoryFs: sandboxed, for tests and embedders that hand the
//!   interpreter a fixture tree instead of real disk access.
//! - LocalFs: a thin pass-through to the real filesystem, for the
//!   demonstration binary.

pub mod types;
pub mod in_memory_fs;
pub mod local_fs;

pub use types::*;
pub use in_memory_fs::InMemoryFs;
pub use local_fs::LocalFs;
