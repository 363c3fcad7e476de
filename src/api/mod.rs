pub mod errors;
pub mod handlers;
pub mod routes;
pub mod ws;

pub use routes::build_router;
