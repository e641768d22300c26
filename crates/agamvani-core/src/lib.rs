//! Core library for the Agam Vani radio client.
//!
//! Holds the API client, wire models, in-memory caches and the live-state
//! synchronizer. Front ends (the `agamvani` CLI, a web shell) build on top
//! of [`sync::RadioSync`] and [`cache::ImageCache`].

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod sync;
pub mod utils;
