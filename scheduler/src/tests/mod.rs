//! Test modules for the scheduler crate

mod adapters_tests;
mod clouds_tests;
mod machine_tests;
mod path_tests;
mod queue_tests;
mod scheduler_tests;
mod store_tests;
mod webhook_tests;
