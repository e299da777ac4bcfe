//! Command-line interface

pub mod commands;
pub mod simulate;

pub use commands::*;
pub use simulate::{
    run_bip113_scenario, ScenarioDriver, ScenarioError, ScenarioReport, StepOutcome,
};
