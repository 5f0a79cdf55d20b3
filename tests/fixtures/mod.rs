//! Shared fixtures for the integration tests

mod lossy_link;

pub use lossy_link::{LossPattern, LossyLink};
