//! Development server with live reload for versa docs.
//!
//! Serves the rendered output with production-style redirects, re-renders the
//! site when template sources change, and tells connected browsers to reload
//! once the output settles.

pub mod livereload;
pub mod server;
pub mod watcher;

pub use livereload::{ReloadHub, ReloadMessage};
pub use server::{DevServer, DevServerConfig, ServerError, NOT_FOUND_PAGE};
pub use watcher::{FileWatcher, RebuildSignal, SourceWatcher, WatchEvent, WatchEventKind};
