//! Test modules for the shared crate

mod config_tests;
mod engine_tests;
mod models_tests;
mod utils_tests;
