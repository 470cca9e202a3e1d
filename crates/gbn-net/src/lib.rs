//! Socket runtime for the Go-Back-N engines.
//!
//! [`Server`] keeps one task per peer address and feeds it datagrams over a
//! channel; [`fetch`] runs a single receiver against a server. Both drive
//! the engines through [`Driver`], which turns buffered engine actions into
//! timers and datagrams.

pub mod client;
pub mod driver;
pub mod error;
pub mod server;

pub use client::{ClientConfig, FetchSummary, fetch};
pub use driver::{Actions, Driver, Timers};
pub use error::{ClientError, ServerError};
pub use server::{Server, ServerConfig};
