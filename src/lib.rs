//! Licensor - device-bound license keys
//!
//! Issues license keys per project, binds them to a limited number of
//! devices, and validates them against an encrypted device fingerprint.
//! Includes the SQLite store, the HTTP API and a client.

pub mod client;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod keygen;
pub mod models;
pub mod service;
pub mod util;
