//! A multi-threaded HTTP/1.1 static file server with login and registration
//! endpoints, built on an epoll dispatcher, a bounded worker pool and an
//! ascending idle-timer list.

pub mod error;
pub mod logger;
pub mod server;
pub mod static_files;
pub mod store;
pub mod sync;
pub mod threadpool;
pub mod timer;

pub use error::{Error, Result};
