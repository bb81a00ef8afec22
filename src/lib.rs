pub mod backend;
pub mod card;
pub mod config;
pub mod controller;
pub mod diff;
pub mod errors;
pub mod feedback;
pub mod paragraph;
pub mod phase;
pub mod session;
pub mod transport;
pub mod workflow;
