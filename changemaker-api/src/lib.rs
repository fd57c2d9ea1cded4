//! # Changemaker API Server Library
//!
//! HTTP surface of Changemaker: workspaces, challenges, rewards, email and
//! the AI composer, served with Axum.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Security headers and AI rate limiting
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
