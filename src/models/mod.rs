//! Domain records shared by the engine, the stores and the HTTP boundary.

mod download;
mod hook;
mod request;

pub use download::{Download, DownloadState, Metadata, Status, TransitionError};
pub use hook::{HookRecord, HookState};
pub use request::Request;
