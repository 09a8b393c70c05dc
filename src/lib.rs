pub mod aggregate;
pub mod cli;
pub mod config;
pub mod demangle;
pub mod error;
pub mod model;
pub mod parsers;
pub mod resolve;
pub mod runner;
