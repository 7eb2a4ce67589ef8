//! Command batching.

pub mod command_batcher;
