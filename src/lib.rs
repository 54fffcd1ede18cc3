#![recursion_limit = "256"]

pub mod address;
pub mod ai;
pub mod api;
pub mod config;
pub mod employee;
pub mod error;
pub mod export;
pub mod frida;
pub mod http;
pub mod llm;
pub mod logging;
pub mod store;
