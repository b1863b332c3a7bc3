pub mod cache;
pub mod geo;
pub mod health;
pub mod render;
pub mod route;
pub mod session;
