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

//! Pooled connections and the interface to create them

use async_trait::async_trait;
use pingora_error::Result;
use std::ops::{Deref, DerefMut};
use tokio::time::Instant;

/// The interface to open, probe and close the connections of a [crate::Pool]
///
/// None of these methods is ever called while the pool holds its internal lock.
#[async_trait]
pub trait Connect: Send + Sync {
    /// The connection type handed out by the pool
    type Connection: Send;

    /// Open one new connection.
    ///
    /// Errors are returned to the caller of [crate::Pool::get()] as is.
    async fn connect(&self) -> Result<Self::Connection>;

    /// Check that an idle connection is still usable before it is handed out again.
    ///
    /// `last_returned` is when the connection was put back into the pool. Any error makes the
    /// pool close this connection and move on to the next idle one; the error itself is never
    /// surfaced. Freshly opened connections are not tested.
    ///
    /// The default implementation accepts every connection.
    async fn test_on_borrow(
        &self,
        _connection: &mut Self::Connection,
        _last_returned: Instant,
    ) -> Result<()> {
        Ok(())
    }

    /// Close a connection the pool no longer wants.
    ///
    /// The default implementation just drops it.
    async fn close(&self, connection: Self::Connection) {
        drop(connection)
    }
}

/// A connection borrowed from a [crate::Pool]
///
/// It should be handed back via [crate::Pool::put()], which is how the pool learns that the slot
/// it occupies is free again.
#[derive(Debug)]
pub struct PooledConnection<S> {
    connection: S,
    created: Instant,
    last_returned: Instant,
}

impl<S> PooledConnection<S> {
    pub(crate) fn new(connection: S) -> Self {
        let now = Instant::now();
        PooledConnection {
            connection,
            created: now,
            last_returned: now,
        }
    }

    /// When the underlying connection was opened
    pub fn created(&self) -> Instant {
        self.created
    }

    /// When this connection was last put back into the pool. Equals [Self::created()] for a
    /// connection that was never returned.
    pub fn last_returned(&self) -> Instant {
        self.last_returned
    }

    pub(crate) fn mark_returned(&mut self) {
        self.last_returned = Instant::now();
    }

    pub(crate) fn into_inner(self) -> S {
        self.connection
    }
}

impl<S> Deref for PooledConnection<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.connection
    }
}

impl<S> DerefMut for PooledConnection<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.connection
    }
}
