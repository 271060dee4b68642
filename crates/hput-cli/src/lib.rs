// Copyright 2025 hput Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # hput CLI
//!
//! Command-line interface for the hput server.
//!
//! The binary parses flags with `argh`, opens the selected storage backend
//! and hands both to [`hput_server::HttpServer`]. This library half holds the
//! pieces of that wiring worth testing on their own: backend selection and
//! log level parsing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use hput_store::{FileSaver, MemorySaver, Saver};

#[cfg(test)]
mod tests;

/// Storage backend selected with `--storage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Files under the `--filename` directory; survives restarts.
    Local,
    /// Process memory; everything is gone on exit.
    Memory,
}

impl FromStr for Storage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Storage::Local),
            "memory" => Ok(Storage::Memory),
            other => Err(format!(
                "unsupported storage '{}', currently supported: local and memory",
                other
            )),
        }
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Local => f.write_str("local"),
            Storage::Memory => f.write_str("memory"),
        }
    }
}

/// Opens the backend for `storage`. `filename` is only used by
/// [`Storage::Local`].
pub fn open_saver(storage: Storage, filename: &str) -> anyhow::Result<Arc<dyn Saver>> {
    match storage {
        Storage::Local => {
            let saver = FileSaver::open(filename)
                .map_err(|e| anyhow::anyhow!("Failed to open local storage {}: {}", filename, e))?;
            Ok(Arc::new(saver))
        }
        Storage::Memory => Ok(Arc::new(MemorySaver::new())),
    }
}

/// Log level accepted by `--log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive used when `RUST_LOG` is not set.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown log level '{}', options are: debug, info, warn, error",
                other
            )),
        }
    }
}
