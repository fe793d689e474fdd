pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::AppState;
pub use middleware::require_passcode;
pub use routes::create_api_routes;
