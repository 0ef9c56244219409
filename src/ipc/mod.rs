//! Request/response surface of the session channel.
//!
//! Every renderer request (`create`, `write`, `resize`, `interrupt`,
//! `close`, `list`, `action`) is answered with a [`Response`]. Session
//! output travels separately as [`crate::relay::SessionEvent`]s.

mod router;
mod types;

pub use router::RequestRouter;
pub use types::{CreateRequest, Request, Response};
