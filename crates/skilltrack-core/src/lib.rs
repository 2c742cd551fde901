//! skilltrack-core — Quiz grading, attempt lifecycle and training progression.
//!
//! This crate defines the definition model, the grading rules, the attempt
//! state machine and the completion cascade that turns finished modules
//! into completed trainings and issued certificates. Storage, definitions,
//! certificate issuance and time are reached through the traits in
//! [`traits`] and [`clock`], with in-memory implementations in [`memory`].

pub mod attempt;
pub mod cascade;
pub mod certificates;
pub mod clock;
pub mod engine;
pub mod error;
pub mod memory;
pub mod model;
pub mod normalizer;
pub mod parser;
pub mod progress;
pub mod records;
pub mod scoring;
pub mod tracker;
pub mod traits;
