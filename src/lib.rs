pub mod api;
pub mod config;
pub mod engine;
pub mod hooks;
pub mod humanize;
pub mod links;
pub mod models;
pub mod observability;
pub mod requests;
pub mod retry;
pub mod store;
