// Copyright 2016 The Mesh Developers
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

//! Logging bootstrap shared by every binary that embeds the mesh layer.

use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::{threshold::ThresholdFilter, Filter, Response};

const LOGGING_PATTERN: &str = "{d(%Y%m%d %H:%M:%S%.3f)} {h({l})} {M} - {m}{n}";

lazy_static::lazy_static! {
    static ref WAS_INIT: Mutex<bool> = Mutex::new(false);
}

/// Log verbosity level, mirrored onto [`log::LevelFilter`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    /// Error.
    Error,
    /// Warning.
    Warning,
    /// Info.
    Info,
    /// Debug.
    Debug,
    /// Trace.
    Trace,
}

fn convert_log_level(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warning => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

/// Logging configuration for a mesh node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Whether to log to stdout.
    pub log_to_stdout: bool,
    /// Stdout verbosity.
    pub stdout_log_level: LogLevel,
    /// Whether to additionally log to a file.
    pub log_to_file: bool,
    /// File verbosity.
    pub file_log_level: LogLevel,
    /// Log file path, used only when `log_to_file` is set.
    pub log_file_path: String,
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            log_to_stdout: true,
            stdout_log_level: LogLevel::Info,
            log_to_file: false,
            file_log_level: LogLevel::Debug,
            log_file_path: String::from("meshcore.log"),
        }
    }
}

/// Rejects log records that don't originate from this crate, so embedding
/// applications don't get their own noise filtered through our config.
#[derive(Debug)]
struct MeshFilter;

impl Filter for MeshFilter {
    fn filter(&self, record: &log::Record<'_>) -> Response {
        match record.module_path() {
            Some(module_path) if module_path.starts_with("meshcore") => Response::Neutral,
            _ => Response::Reject,
        }
    }
}

/// Initializes the global logger. Safe to call more than once; only the
/// first call takes effect.
pub fn init_logger(config: LoggingConfig) {
    let mut was_init = WAS_INIT.lock();
    if *was_init {
        return;
    }

    let stdout_level = convert_log_level(config.stdout_log_level);
    let file_level = convert_log_level(config.file_log_level);
    let root_level = stdout_level.max(file_level);

    let mut root = Root::builder();
    let mut appenders = Vec::new();

    if config.log_to_stdout {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOGGING_PATTERN)))
            .build();
        appenders.push(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(stdout_level)))
                .filter(Box::new(MeshFilter))
                .build("stdout", Box::new(stdout)),
        );
        root = root.appender("stdout");
    }

    if config.log_to_file {
        if let Ok(file) = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOGGING_PATTERN)))
            .build(&config.log_file_path)
        {
            appenders.push(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(file_level)))
                    .filter(Box::new(MeshFilter))
                    .build("file", Box::new(file)),
            );
            root = root.appender("file");
        }
    }

    if let Ok(log_config) = Config::builder()
        .appenders(appenders)
        .build(root.build(root_level))
    {
        let _ = log4rs::init_config(log_config);
    }

    *was_init = true;
}

/// Initializes a stdout-only logger at debug level, for tests.
pub fn init_test_logger() {
    let mut config = LoggingConfig::default();
    config.stdout_log_level = LogLevel::Debug;
    init_logger(config);
}
