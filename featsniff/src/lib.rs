pub mod app;
pub mod cmd;
pub mod config;
pub mod error;
pub mod live;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod sys;
