//! Expert Relay - Core Library
//!
//! Matches free-text queries against an expert catalog, augments them with a
//! generated answer, and fans expert responses out to live subscribers.

pub mod broadcast;
pub mod catalog;
pub mod cli;
pub mod error;
pub mod generator;
pub mod persistence;
pub mod server;
pub mod service;
pub mod settings;
pub mod store;
pub mod telemetry;

pub use error::ServiceError;
