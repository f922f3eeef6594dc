//! HTTP control surface

pub mod handlers;
pub mod server;

pub use server::WebServer;
