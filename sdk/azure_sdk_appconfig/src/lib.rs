#![doc = include_str!("../README.md")]

pub mod auth;
pub mod client;
pub mod connection_string;
pub mod models;
pub mod setting;
pub mod snapshot;
pub mod sync_token;

pub use client::{ConfigurationClient, ConfigurationClientBuilder};
pub use models::{Setting, SettingFilter, Snapshot};
