//! # cinder — a reactor-driven in-memory key-value server
//!
//! cinder speaks a subset of the RESP wire protocol over TCP. One thread
//! runs everything: a readiness reactor multiplexes the listener, every
//! client socket and a timer list, and the keyspace lives in an
//! incrementally-rehashed hash table so growth never stalls the loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        EventLoop                           │
//! │   file events (fd, direction)        time events           │
//! └──────┬───────────────┬──────────────────────┬──────────────┘
//!        │ accept        │ read / write         │ every 100 ms
//!        ▼               ▼                      ▼
//!  ┌───────────┐   ┌───────────────┐   ┌─────────────────┐
//!  │ Listener  │   │ Client        │   │ Expiration sweep│
//!  └───────────┘   │  query buffer │   └────────┬────────┘
//!                  │  parser state │            │
//!                  │  reply queue  │            ▼
//!                  └──────┬────────┘   ┌─────────────────┐
//!                         │ dispatch   │ Db              │
//!                         └───────────>│  data:   Dict   │
//!                                      │  expire: Dict   │
//!                                      └─────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`reactor`]: the single-threaded file + time event loop
//! - [`net`]: non-blocking TCP primitives
//! - [`protocol`]: incremental request parser and reply frames
//! - [`storage`]: tagged values, the incremental dict, the keyspace
//! - [`commands`]: the command table (`get`, `set`, `expire`)
//! - [`server`]: the shell wiring all of the above
//! - [`config`]: JSON configuration
//!
//! ## Expiration
//!
//! Keys with a deadline are reclaimed two ways:
//! 1. **Lazy**: every read checks the deadline before touching the data.
//! 2. **Active**: a recurring time event samples the expire dict and drops
//!    whatever is overdue, so untouched keys still get reclaimed.

pub mod commands;
pub mod config;
pub mod net;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigError};
pub use reactor::{Direction, EventLoop, TimeKind};
pub use server::{Server, ServerError};
pub use storage::db::Db;
pub use storage::dict::{Dict, DictError};
pub use storage::object::{Kind, Value};

/// The default port cinder listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host cinder binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of cinder
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
