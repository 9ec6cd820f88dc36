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

//! An uppercase echo server and a handful of clients sharing one blocking pool
//!
//! RUST_LOG=debug cargo run --example upper_echo -- --workers 32 --max-active 8

use clap::Parser;
use keepalive_pool::{Pool, PoolConf, PoolOptions};
use keepalive_wire::{read_frame, write_frame, TcpConnector};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "upper_echo")]
struct Opt {
    /// How many concurrent clients
    #[arg(long, default_value_t = 16)]
    workers: usize,
    /// How many requests each client sends
    #[arg(long, default_value_t = 100)]
    requests: usize,
    /// The cap on open connections
    #[arg(long, default_value_t = 4)]
    max_active: usize,
    /// How many idle connections to keep
    #[arg(long, default_value_t = 2)]
    max_idle: usize,
    /// Optional YAML pool configuration, overrides the flags above
    #[arg(short, long)]
    conf: Option<String>,
}

async fn serve(listener: TcpListener) {
    while let Ok((mut stream, peer)) = listener.accept().await {
        tokio::spawn(async move {
            debug!("accepted {peer}");
            loop {
                let frame = match read_frame(&mut stream).await {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("{peer} done: {e}");
                        return;
                    }
                };
                if let Err(e) = write_frame(&mut stream, &frame.to_ascii_uppercase()).await {
                    warn!("failed to respond to {peer}: {e}");
                    return;
                }
            }
        });
    }
}

async fn round_trip(pool: &Pool<TcpConnector>) -> pingora_error::Result<()> {
    let mut conn = pool.get().await?;
    let res = async {
        write_frame(&mut *conn, b"test").await?;
        read_frame(&mut *conn).await
    }
    .await;
    match res {
        Ok(resp) => {
            if &resp[..] != b"TEST" {
                warn!("unexpected response {resp:?}");
            }
            pool.put(conn, false).await;
            Ok(())
        }
        Err(e) => {
            // never let a connection in an unknown state back into the pool
            pool.put(conn, true).await;
            Err(e)
        }
    }
}

#[tokio::main]
async fn main() -> pingora_error::Result<()> {
    env_logger::init();
    let opt = Opt::parse();

    let options = match &opt.conf {
        Some(path) => PoolOptions::from_conf(&PoolConf::load_from_yaml(path)?),
        None => PoolOptions {
            max_idle: opt.max_idle,
            max_active: opt.max_active,
            idle_timeout: Some(Duration::from_secs(20)),
            max_conn_lifetime: Some(Duration::from_secs(100)),
            wait: true,
        },
    };

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind the echo server");
    let addr = listener.local_addr().expect("bound address").to_string();
    tokio::spawn(serve(listener));

    let connector = TcpConnector::new(addr).connection_timeout(Duration::from_secs(1));
    let pool = Arc::new(Pool::new(connector, options));

    let mut clients = Vec::with_capacity(opt.workers);
    for _ in 0..opt.workers {
        let pool = pool.clone();
        let requests = opt.requests;
        clients.push(tokio::spawn(async move {
            for _ in 0..requests {
                if let Err(e) = round_trip(&pool).await {
                    warn!("request failed: {e}");
                }
            }
        }));
    }
    for client in clients {
        let _ = client.await;
    }

    info!(
        "{} requests done, {} connections open, {} idle",
        opt.workers * opt.requests,
        pool.active(),
        pool.idle_count()
    );
    pool.close().await
}
