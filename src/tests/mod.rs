mod analysis_scenarios;
mod common;
