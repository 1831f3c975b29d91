pub mod auth;
pub mod config;
pub mod conversations;
pub mod csrf;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod session;
pub mod state;
pub mod ws;

pub use config::Config;
pub use error::ApiError;
pub use router::build_router;
pub use state::{AppState, AppStateInner};
