//! Stackform: nested stack configuration loading.
//!
//! Loads a tree of stacks that embed other stacks, resolving every call's
//! source address (local, remote, or version-constrained registry) to one
//! final address, then decodes type constraints with a single provider type
//! per provider across the whole tree.

pub mod cli;
pub mod core;
