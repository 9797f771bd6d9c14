//! # pantry-server
//!
//! Event hub for the real-time sync layer: authenticates WebSocket clients,
//! groups them into household rooms and fans domain events out to them.

pub mod auth;
pub mod client;
pub mod event_bridge;
pub mod server;

pub use auth::{AuthError, TokenAuthenticator};
pub use client::{ClientRegistry, Outgoing};
pub use server::{build_router, start, AppState, InboundEmit, ServerConfig, ServerHandle};
