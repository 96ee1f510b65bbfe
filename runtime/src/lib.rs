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

//! Per-worker cooperative bundle switching for an M:N runtime: a small
//! fixed set of threads co-resident on one CPU rotates round-robin on
//! an asynchronous tick, hiding short stalls without a trip through
//! the full scheduler.

pub(crate) mod arch;
pub mod bundle;
pub mod config;
pub mod error;
pub mod logger;
pub mod register;
pub mod sched;
pub mod sites;
pub mod startup;
pub(crate) mod support;
pub mod sync;
pub mod thread;
pub mod worker;

pub use bundle::BundleStats;
pub use config::Config;
pub use error::{Error, Result};
pub use startup::init;
pub use thread::ThreadFrame;
pub use worker::Worker;
