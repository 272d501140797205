//! Real-time chat hub and background notification worker for the LMS backend.

// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod telemetry;

// Chat
pub mod chat;
pub mod websocket;

// Notifications
pub mod queue;
pub mod worker;

// HTTP surface
pub mod api;
pub mod server;
