pub mod app;
pub mod background_jobs;
pub mod catalog_store;
pub mod cleanup;
pub mod config;
pub mod server;
pub mod sqlite_persistence;
pub mod status_store;
