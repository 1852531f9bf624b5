//! Common functionality for plantsim, a simulator of time-stepped multi-commodity plants.
#![warn(missing_docs)]
pub mod cli;
pub mod commodity;
pub mod edge;
pub mod horizon;
pub mod id;
pub mod input;
pub mod log;
pub mod node;
pub mod output;
pub mod plan;
pub mod plant;
pub mod recourse;
pub mod runtime;
pub mod series;
pub mod settings;
pub mod simulation;
pub mod variance;

#[cfg(test)]
mod fixture;
