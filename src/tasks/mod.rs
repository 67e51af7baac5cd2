//! Background Tasks Module
//!
//! Work that outlives the event that started it.
//!
//! # Tasks
//! - Keep-alive: background store updates registered so the process is not
//!   torn down before they settle
//! - Runtime trim: drops the oldest runtime entries at configured intervals

mod keepalive;
mod trim;

pub use keepalive::KeepAlive;
pub use trim::{spawn_trim_task, trim_runtime_store, TrimPolicy};
