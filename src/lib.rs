pub mod agent;
pub mod browser;
pub mod compiler;
pub mod config;
pub mod dsl;
pub mod error;
pub mod nodes;
pub mod runtime;
pub mod service;
pub mod store;
pub mod tools;
