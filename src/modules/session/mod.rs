pub mod controller;
pub mod crud;
pub mod error;
pub mod manager;
pub mod model;
pub mod routes;
pub mod schema;

pub use error::SessionError;
pub use manager::SessionManager;
