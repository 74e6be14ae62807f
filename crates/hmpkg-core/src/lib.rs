//! Edits the package lists of a home-manager configuration and applies the result,
//! restoring the previous file when activation fails.

pub mod activate;
pub mod backup;
pub mod blocks;
pub mod config;
pub mod lines;
pub mod packages;
pub mod process;
pub mod transaction;
