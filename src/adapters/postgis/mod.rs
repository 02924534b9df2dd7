//! PostGIS feature store adapter

pub mod adapter;
pub mod client;

pub use adapter::PostgisStore;
pub use client::PostgisClient;
