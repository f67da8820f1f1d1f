pub mod config;
mod connection;
pub mod controller;
pub mod error;
pub mod media;
pub mod session;
pub mod view;

pub use config::ClientConfig;
pub use controller::{Command, Controller, UiEvent};
pub use error::SessionError;
pub use session::{EntryBody, FeedEntry, MediaEntry, Phase, SessionState};
