//! Records a participant's trials, answers and UI events for one experiment
//! session and keeps the record in sync with the experiment server.

pub mod api;
pub mod commands;
pub mod session;
