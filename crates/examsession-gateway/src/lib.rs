//! examsession-gateway: Exam data gateway implementations.
//!
//! Implements the `ExamGateway` trait over REST/JSON and in memory, and builds
//! a gateway from an `examsession.toml` configuration.

pub mod config;
pub mod mock;
pub mod rest;

pub use config::{
    create_gateway, load_config, load_config_from, ExamSessionConfig, GatewayConfig,
    SessionSettings,
};
pub use mock::MockGateway;
pub use rest::RestGateway;
