#![allow(dead_code)]

pub mod logging;
pub mod sandbox;

pub use logging::init_test_logging;
pub use sandbox::Sandbox;
