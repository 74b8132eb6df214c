//! Background Tasks Module
//!
//! Tasks spawned on the Tokio runtime on behalf of the caches.
//!
//! # Tasks
//! - Load: runs one loader invocation and settles its outcome
//! - Batch: runs one batch loader call and settles every key it covers

mod batch;
mod load;

pub(crate) use batch::spawn_batch;
pub(crate) use load::spawn_load;
