//! harvest-mcp library
//!
//! This module exports the core functionality of harvest-mcp for use in
//! integration tests and as a library.

mod migrations;

pub mod config;
pub mod db;
pub mod handlers;
pub mod ingest;
pub mod server;
