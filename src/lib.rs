pub mod apis;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod images;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod resolver;
pub mod types;
pub mod visitors;
