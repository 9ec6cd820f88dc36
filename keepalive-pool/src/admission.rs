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

//! Admission control: how `max_active` is enforced

use once_cell::sync::OnceCell;
use pingora_error::{Error, Result};
use tokio::sync::Semaphore;

use crate::{POOL_CLOSED, POOL_EXHAUSTED};

/// The policy that bounds the number of outstanding connections.
pub(crate) enum Admission {
    /// `max_active == 0`: no limit at all
    Unbounded,
    /// Fail right away with [POOL_EXHAUSTED] once `max_active` connections are open.
    FailFast { max_active: usize },
    /// Suspend the caller until one of the `max_active` tokens is returned.
    Block {
        max_active: usize,
        // Lazily created so that a pool which never hands out a connection costs nothing.
        tokens: OnceCell<Semaphore>,
    },
}

impl Admission {
    pub fn new(max_active: usize, wait: bool) -> Self {
        match (max_active, wait) {
            (0, _) => Admission::Unbounded,
            (max_active, false) => Admission::FailFast { max_active },
            (max_active, true) => Admission::Block {
                max_active,
                tokens: OnceCell::new(),
            },
        }
    }

    /// Take one token, waiting for it if needed.
    ///
    /// Only the blocking policy ever waits. The wait fails with [POOL_CLOSED] once the token
    /// source is closed.
    pub async fn acquire(&self) -> Result<()> {
        let Admission::Block { max_active, tokens } = self else {
            return Ok(());
        };
        let tokens = tokens.get_or_init(|| Semaphore::new(*max_active));
        match tokens.acquire().await {
            Ok(permit) => {
                // the token is handed back explicitly through release()
                permit.forget();
                Ok(())
            }
            Err(_) => Error::e_explain(POOL_CLOSED, "waiting for a connection on a closed pool"),
        }
    }

    /// Decide whether one more connection can be opened when `active` are already open.
    ///
    /// Must be called while holding the pool state lock.
    pub fn admit(&self, active: usize) -> Result<()> {
        match self {
            Admission::FailFast { max_active } if active >= *max_active => Error::e_explain(
                POOL_EXHAUSTED,
                format!("all {max_active} connections are in use"),
            ),
            _ => Ok(()),
        }
    }

    /// Return one token taken by [Self::acquire].
    pub fn release(&self) {
        if let Some(tokens) = self.tokens() {
            tokens.add_permits(1);
        }
    }

    /// Close the token source so that current and future waiters fail instead of hanging.
    pub fn close(&self) {
        if let Some(tokens) = self.tokens() {
            tokens.close();
        }
    }

    /// How many tokens can be taken without waiting. `None` unless the blocking policy has
    /// handed out its first token.
    pub fn available(&self) -> Option<usize> {
        self.tokens().map(|t| t.available_permits())
    }

    fn tokens(&self) -> Option<&Semaphore> {
        match self {
            Admission::Block { tokens, .. } => tokens.get(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Admission::Unbounded => f.write_str("Unbounded"),
            Admission::FailFast { max_active } => f
                .debug_struct("FailFast")
                .field("max_active", max_active)
                .finish(),
            Admission::Block { max_active, .. } => f
                .debug_struct("Block")
                .field("max_active", max_active)
                .field("available", &self.available())
                .finish(),
        }
    }
}
