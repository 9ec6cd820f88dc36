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

//! Wire level helpers for connections pooled by `keepalive_pool`
//!
//! - [TcpConnector]: opens, probes and closes TCP connections for a pool.
//! - [read_frame()]/[write_frame()]: a minimal length prefixed message protocol.

#![warn(clippy::all)]

pub mod framing;
pub mod tcp;

pub use framing::{read_frame, write_frame, FRAME_TOO_LARGE, MAX_FRAME_SIZE};
pub use tcp::TcpConnector;
