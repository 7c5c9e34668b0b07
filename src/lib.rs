pub mod config;
pub mod engine;
pub mod grading;
pub mod logging;
pub mod mastery;
pub mod model;
pub mod scheduler;
pub mod scoring;
pub mod selector;
pub mod sink;
pub mod store;
