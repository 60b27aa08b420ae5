//! A non-blocking façade over an embedded SQLite worker process.
//!
//! The embedded engine blocks its caller for the duration of every
//! statement, so this crate isolates it in a child [`worker`][worker-crate]
//! process and exposes an asynchronous request/response interface over a
//! line-delimited JSON-RPC stream (see the `sqlite-bridge-wire` crate for
//! the wire format itself).
//!
//! Two connection flavors share one public surface
//! (`exec`/`query`/`quit`/`close`/`closed`/`last_error`):
//!
//! - [`EagerConnection`] is bound one-to-one to a live worker process from
//!   the moment [`Factory::open`] resolves.
//! - [`LazyConnection`] defers that open until first use and transparently
//!   recreates the underlying connection after an idle timeout or a
//!   spontaneous worker death.
//!
//! [worker-crate]: https://docs.rs/sqlite-bridge-worker
//!
//! ```no_run
//! # async fn run() -> sqlite_bridge::Result<()> {
//! use sqlite_bridge::{ConnectOptions, Factory};
//!
//! let factory = Factory::new();
//! let conn = factory.open(":memory:", ConnectOptions::default()).await?;
//! let result = conn.query("SELECT 1 AS value", ()).await?;
//! assert_eq!(result.rows.unwrap().len(), 1);
//! conn.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
mod connection;
mod dispatcher;
pub mod error;
mod factory;
mod lazy;
pub mod options;
pub mod params;

#[cfg(test)]
mod test_support;

pub use connection::EagerConnection;
pub use error::{Error, Result};
pub use factory::Factory;
pub use lazy::LazyConnection;
pub use options::{idle_from_secs, ConnectOptions, OpenFlags, TransportMode};
pub use params::{named, IntoParams};
pub use sqlite_bridge_wire::{QueryResult, Row, Value};
