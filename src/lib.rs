#![allow(async_fn_in_trait)]
pub mod credentials;
pub mod earth_engine;
pub mod error;
pub mod export_config;
pub mod export_request;
pub mod geometry;
pub mod imagery;
pub mod workflow;
