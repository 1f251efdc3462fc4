pub mod client;
pub mod models;

pub use client::{UnifiedApiConfig, UnifiedApiProvider};
