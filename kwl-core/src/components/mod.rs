//! Application components built on the scheduler.

pub mod periodic;
pub mod sensors;
