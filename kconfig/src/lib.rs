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

#![no_std]

/// Compile-time maximum number of slots in a worker's bundle. The
/// effective size is configured at runtime and may be smaller.
pub const BUNDLE_SLOTS: usize = 8;

/// Capacity of each worker's circular run queue. Entries beyond this
/// spill to the worker's overflow list.
pub const RUNTIME_RQ_SIZE: usize = 32;

/// Upper bound on workers registered in one process.
pub const NUM_WORKERS_MAX: usize = 64;

/// TSC delta used as the deadline by the stall handler body.
pub const LAME_STALL_CYCLES: u64 = 2200;

/// Fixed TSC delta added by the pretend-switch handler body, used to
/// calibrate switching overhead against a known stall.
pub const LAME_PRETEND_CYCLES: u64 = 400;

/// Default page-size exponent for the live-site bitmap. Negative
/// disables the bitmap entirely.
pub const DEFAULT_BITMAP_PGSZ_FACTOR: i32 = -1;

/// Upper bound of the extended-state save area. Real area sizes are
/// CPUID-reported and smaller; the scratch buffer is sized to the cap.
pub const XSAVE_AREA_SIZE: usize = 4096;
