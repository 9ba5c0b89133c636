mod error;
mod flush;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::err;
pub use flush::{flush_all, flush_due};
pub use router::handle_request;
pub use types::{AppState, Request};
