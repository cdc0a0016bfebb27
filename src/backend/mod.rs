//! Backend module - contract, providers, job polling and registry

pub mod credentials;
pub mod http;
pub mod poll;
pub mod providers;
pub mod registry;
pub mod traits;
