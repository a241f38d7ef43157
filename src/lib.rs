//! Client library for a model management service: schema-driven prediction
//! input, training requests and the session that coordinates them.
/// Backend gateway, request context and wire types.
pub mod api;
/// Application directory helpers.
pub mod app_dirs;
/// Persistent client configuration.
pub mod config;
mod http_client;
/// Background job plumbing shared by the registry and the session.
pub mod jobs;
/// Logging setup.
pub mod logging;
/// Schema, encoding and request compilation.
pub mod pipeline;
/// Workflow session state machine.
pub mod workflow;

#[cfg(test)]
mod test_support;
