// Copyright (c) 2025 vivo Mobile Communication Co., Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{sync::SpinLock, worker::Worker};
use log::{LevelFilter, Metadata, Record};
use std::{
    io::Write,
    sync::OnceLock,
    time::Instant,
};

static LOGGER_MUTEX: SpinLock<()> = SpinLock::new(());
static START: OnceLock<Instant> = OnceLock::new();

struct Logger;

pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

///set max log level
pub fn set_max_level(level: LogLevel) {
    match level {
        LogLevel::Trace => log::set_max_level(LevelFilter::Trace),
        LogLevel::Debug => log::set_max_level(LevelFilter::Debug),
        LogLevel::Info => log::set_max_level(LevelFilter::Info),
        LogLevel::Warn => log::set_max_level(LevelFilter::Warn),
        LogLevel::Error => log::set_max_level(LevelFilter::Error),
    }
}

/// log init
pub fn logger_init() {
    static LOGGER: Logger = Logger {};
    START.get_or_init(Instant::now);
    #[cfg(debug_assertions)]
    log::set_max_level(LevelFilter::Trace);
    #[cfg(not(debug_assertions))]
    log::set_max_level(LevelFilter::Warn);
    let _ = log::set_logger(&LOGGER);
}

///impl log for Logger
impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = START
            .get()
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let wid = Worker::current().map(|w| w.id() as i64).unwrap_or(-1);
        let _guard = LOGGER_MUTEX.lock();
        let mut sink = std::io::stderr().lock();
        let _ = writeln!(
            sink,
            "[T:{:09} W:{}][{}] {}",
            timestamp,
            wid,
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {}
}
