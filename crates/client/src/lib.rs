//! Embedded entry point for fedq.
//!
//! An [`Engine`] owns the source registry and metrics; a [`Session`] compiles
//! statements against it and starts them; a [`QueryResult`] streams the rows
//! back and cancels the query when dropped early.

mod runtime;

pub mod engine;
pub mod result;
pub mod session;

pub use engine::Engine;
pub use result::QueryResult;
pub use session::Session;
