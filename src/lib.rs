// Library exports for remote-term
// This allows the test suite to import modules

pub mod bind;
pub mod channel;
pub mod cli;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod endpoint;
pub mod keys;
pub mod logging;
pub mod protocol;
pub mod render;
pub mod session;
pub mod tui;
