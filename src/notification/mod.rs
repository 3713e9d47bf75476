pub mod aggregator;
pub mod controller;
pub mod message;
pub mod model;
pub mod service;
pub mod store;
pub mod stream;
