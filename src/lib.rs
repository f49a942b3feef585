pub mod auth;
pub mod business_units;
pub mod config;
pub mod geo;
pub mod insights;
pub mod llm;
pub mod managers;
pub mod routing;
pub mod shared;
pub mod stats;
pub mod tickets;
