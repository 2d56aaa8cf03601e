pub mod api;
pub mod auth;
pub mod events;
pub mod models;
pub mod pagination;
pub mod routes;
