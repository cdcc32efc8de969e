//! Diagnostic command surface shared by the console and the bus topics.
//!
//! [`grammar`] turns console lines into [`grammar::Command`] values and
//! [`topic`] does the same for bus messages; [`commands`] executes them and
//! [`report`] renders the results.

pub mod catalog;
pub mod commands;
pub mod grammar;
pub mod report;
pub mod topic;
