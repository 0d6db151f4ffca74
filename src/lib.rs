pub mod app;
pub mod circle;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod inat;
pub mod output;
pub mod picker;
pub mod projection;
pub mod runlog;
pub mod taxonomy;
pub mod tui;
pub mod workspace;
