//! REST API client module for the radio service.
//!
//! This module provides the `ApiClient` for fetching live radio state
//! (now playing, daily schedule) and artwork, plus the `RadioSource` and
//! `ImageSource` traits the caches and synchronizer are written against.
//!
//! All endpoints are public; no authentication is involved.

pub mod client;
pub mod error;

pub use client::{ApiClient, FetchedImage, ImageSource, RadioSource};
pub use error::FetchError;
