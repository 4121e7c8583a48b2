//! Core logic: source addresses, stack loading, tree building, type decoding.

pub mod bundle;
pub mod config;
pub mod diagnostics;
pub mod parser;
pub mod resolver;
pub mod sourceaddr;
pub mod typecheck;
pub mod typeexpr;
pub mod types;
pub mod versions;
