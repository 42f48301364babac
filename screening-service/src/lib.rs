pub mod client;
pub mod config;
pub mod models;
pub mod service;

pub use client::HttpAssessor;
pub use config::{LogFormat, ServiceConfig};
pub use models::*;
pub use service::{AppState, build_router, create_app, spawn_session_sweeper};
