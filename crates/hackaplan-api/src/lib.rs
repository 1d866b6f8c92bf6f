//! HTTP and WebSocket surface for lookups: routes, DTOs, and OpenAPI documentation.

pub mod client_ip;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
