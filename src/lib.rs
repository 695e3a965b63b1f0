//! MindBridge real-time messaging server library.
//! This crate exposes internal modules for integration testing and for Rust clients
//! (see `client`). The binary entry point is in main.rs.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;
