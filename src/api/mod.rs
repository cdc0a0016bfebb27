//! HTTP API - handlers, bodies and router

pub mod handlers;
pub mod models;
pub mod routes;
