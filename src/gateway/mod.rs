//! Gateway module - backend selection and dispatch with fallback

pub mod dispatcher;
pub mod selection;

pub use dispatcher::{DispatchConfig, Dispatcher};
pub use selection::SelectionEngine;
