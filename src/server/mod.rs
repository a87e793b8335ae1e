mod handlers;
mod models;
mod state;

pub use handlers::{router, run_server};
pub use models::{ProcessScreenshotRequest, ProcessScreenshotResponse};
pub use state::ServerState;
