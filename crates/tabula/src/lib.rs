pub mod activity;
pub mod auth;
pub mod client;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod filter;
pub mod id;
pub mod issues;
pub mod output;
pub mod types;
pub mod users;
pub mod validate;
