//! Statement AST accepted by the fedq planner.
//!
//! This crate is the boundary with external parsers: it defines what a
//! resolved statement looks like, not how text becomes one.

pub mod ast;
pub mod expr;

pub use ast::*;
pub use expr::*;
