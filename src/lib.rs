pub mod acl;
pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod files;
pub mod functions;
pub mod handlers;
pub mod middleware;
pub mod modules;
pub mod schema;
pub mod seed;
pub mod server;
pub mod store;
pub mod triggers;
