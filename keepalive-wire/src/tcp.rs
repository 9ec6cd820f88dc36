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

//! Pooled TCP connections

use async_trait::async_trait;
use futures::future::FutureExt;
use keepalive_pool::Connect;
use log::{debug, warn};
use pingora_error::{Error, ErrorType::*, OrErr, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// [TcpConnector] opens TCP connections to a single server address
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addr: String,
    connection_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Create a new [TcpConnector] to the given `host:port`
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector {
            addr: addr.into(),
            connection_timeout: None,
        }
    }

    /// Give up on connecting after the given duration
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// The address this connector connects to
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connect for TcpConnector {
    type Connection = TcpStream;

    async fn connect(&self) -> Result<TcpStream> {
        let connect_future = TcpStream::connect(self.addr.as_str());
        let conn_res = match self.connection_timeout {
            Some(t) => pingora_timeout::timeout(t, connect_future)
                .await
                .explain_err(ConnectTimedout, |_| {
                    format!("timeout {t:?} connecting to server {}", self.addr)
                })?,
            None => connect_future.await,
        };
        let stream =
            conn_res.or_err_with(ConnectError, || format!("Fail to connect to {}", self.addr))?;
        stream
            .set_nodelay(true)
            .or_err(SocketError, "failed to set TCP_NODELAY")?;
        debug!("connected to new server: {}", self.addr);
        Ok(stream)
    }

    async fn test_on_borrow(&self, stream: &mut TcpStream, _last_returned: Instant) -> Result<()> {
        if test_reusable_stream(stream) {
            Ok(())
        } else {
            Error::e_explain(ConnectionClosed, "idle connection is not reusable")
        }
    }

    async fn close(&self, mut stream: TcpStream) {
        if let Err(e) = stream.shutdown().await {
            debug!("error shutting down connection: {e}");
        }
    }
}

/// Test whether an idle stream is already closed or not reusable (server sent unexpected data)
fn test_reusable_stream(stream: &mut TcpStream) -> bool {
    let mut buf = [0; 1];
    let result = stream.read(&mut buf[..]).now_or_never();
    if let Some(data_result) = result {
        match data_result {
            Ok(n) => {
                if n == 0 {
                    debug!("Idle connection is closed");
                } else {
                    warn!("Unexpected data read in idle connection");
                }
            }
            Err(e) => {
                debug!("Idle connection is broken: {e:?}");
            }
        }
        false
    } else {
        true
    }
}
