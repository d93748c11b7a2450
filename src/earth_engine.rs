pub mod expression;
mod provider;
mod wire;

pub use provider::{EarthEngine, Session};
