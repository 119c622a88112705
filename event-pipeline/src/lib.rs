pub mod api;
pub mod classify;
pub mod config;
pub mod endpoint;
pub mod event;
pub mod metrics_middleware;
pub mod normalize;
pub mod persistence;
pub mod pipeline;
pub mod prometheus;
pub mod router;
pub mod routing;
pub mod server;
pub mod stores;
pub mod time;
pub mod topics;
pub mod utils;
pub mod validation;
