pub mod client;
pub mod config;
pub mod continuation;
pub mod errors;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod ui;
pub mod web;
