pub mod chat;
pub mod connection;
pub mod dispatcher;

/// Path of the study-group real-time namespace.
pub const NAMESPACE: &str = "/study-groups";
