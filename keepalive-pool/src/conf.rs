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

//! Pool configurations
//!
//! [PoolConf] is the serializable form read from YAML files, [PoolOptions] is what a
//! [crate::Pool] is built with.

use log::{debug, trace, warn};
use pingora_error::{Error, ErrorType, ErrorType::*, OrErr, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// The configuration is valid YAML but describes an unusable pool
pub const INVALID_CONF: ErrorType = ErrorType::new("InvalidConf");

/// The configuration file of a pool
///
/// Unknown keys are ignored so that the pool settings can live in a larger configuration file.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConf {
    /// How many idle connections to keep. 0 keeps none.
    pub max_idle: usize,
    /// How many connections, idle or borrowed, can be open at the same time. 0 means unbounded.
    pub max_active: usize,
    /// Idle connections older than this are closed the next time the pool is used.
    /// 0 keeps them forever.
    ///
    /// This should be shorter than the idle timeout of the server side.
    pub idle_timeout_ms: u64,
    /// Connections opened longer ago than this are not reused. 0 means no limit.
    pub max_conn_lifetime_ms: u64,
    /// When `max_active` is reached, wait for a connection to be returned instead of failing.
    pub wait: bool,
}

impl Default for PoolConf {
    fn default() -> Self {
        PoolConf {
            max_idle: 16,
            max_active: 0,
            idle_timeout_ms: 0,
            max_conn_lifetime_ms: 0,
            wait: false,
        }
    }
}

impl PoolConf {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: PoolConf = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        trace!("Loaded conf: {conf:?}");
        conf.validate()
    }

    pub fn to_yaml(&self) -> String {
        // a struct of plain numbers and bools always serializes
        serde_yaml::to_string(self).unwrap_or_default()
    }

    pub fn validate(self) -> Result<Self> {
        // idle connections count towards max_active so the extra ones could never be used
        if self.max_active > 0 && self.max_idle > self.max_active {
            return Error::e_explain(
                INVALID_CONF,
                format!(
                    "max_idle {} is larger than max_active {}",
                    self.max_idle, self.max_active
                ),
            );
        }
        if self.wait && self.max_active == 0 {
            warn!("wait has no effect when max_active is unbounded");
        }
        Ok(self)
    }
}

/// The settings of a [crate::Pool]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolOptions {
    /// How many idle connections to keep
    pub max_idle: usize,
    /// How many connections can be open at the same time, 0 for no limit
    pub max_active: usize,
    /// Close idle connections that have not been used for this long
    pub idle_timeout: Option<Duration>,
    /// Do not reuse connections opened longer ago than this
    pub max_conn_lifetime: Option<Duration>,
    /// Wait for a connection instead of failing when `max_active` is reached
    pub wait: bool,
}

impl PoolOptions {
    /// Derive the [PoolOptions] from a [PoolConf]
    pub fn from_conf(conf: &PoolConf) -> Self {
        // 0 in the conf file means the limit is off
        let millis = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        PoolOptions {
            max_idle: conf.max_idle,
            max_active: conf.max_active,
            idle_timeout: millis(conf.idle_timeout_ms),
            max_conn_lifetime: millis(conf.max_conn_lifetime_ms),
            wait: conf.wait,
        }
    }

    /// Create a new [PoolOptions] that keeps up to `max_idle` idle connections without any other
    /// limits
    pub fn new(max_idle: usize) -> Self {
        PoolOptions {
            max_idle,
            max_active: 0,
            idle_timeout: None,
            max_conn_lifetime: None,
            wait: false,
        }
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from_conf(&PoolConf::default())
    }
}
