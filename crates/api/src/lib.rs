//! HTTP API: server, routing, and request/response mapping for the
//! cross-module services.

pub mod app;
