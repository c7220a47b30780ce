pub mod db;
pub mod models;
pub mod progress;
pub mod queue;
pub mod resolver;
pub mod service;
pub mod store;
pub mod sync;
