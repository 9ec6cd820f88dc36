// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded pooling of long-lived connections
//!
//! A [Pool] opens connections through a user provided [Connect] implementation, lends them out
//! and keeps the returned ones around for reuse. The number of open connections can be capped,
//! either failing fast or making callers wait once the cap is reached.
//!
//! Stale connections are evicted lazily when a connection is borrowed, there are no background
//! tasks. The pool lock is never held while a connection is being opened, probed or closed.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use keepalive_pool::{Connect, Pool, PoolOptions};
//! use pingora_error::{OrErr, ErrorType::ConnectError, Result};
//! use tokio::net::TcpStream;
//!
//! struct Backend;
//!
//! #[async_trait]
//! impl Connect for Backend {
//!     type Connection = TcpStream;
//!
//!     async fn connect(&self) -> Result<TcpStream> {
//!         TcpStream::connect("127.0.0.1:8972")
//!             .await
//!             .or_err(ConnectError, "backend unreachable")
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let mut options = PoolOptions::new(16);
//! options.max_active = 64;
//! options.wait = true;
//! let pool = Pool::new(Backend, options);
//!
//! let conn = pool.get().await?;
//! // ... talk to the backend ...
//! pool.put(conn, false).await;
//! pool.close().await
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

mod admission;
mod conf;
mod connection;
mod idle;
mod pool;

pub use conf::{PoolConf, PoolOptions, INVALID_CONF};
pub use connection::{Connect, PooledConnection};
pub use pool::Pool;

use pingora_error::ErrorType;

/// [Pool::get()] was called on a closed pool, or the pool was closed while waiting
pub const POOL_CLOSED: ErrorType = ErrorType::new("PoolClosed");
/// [Pool::get()] found all `max_active` connections in use and is not allowed to wait
pub const POOL_EXHAUSTED: ErrorType = ErrorType::new("PoolExhausted");
