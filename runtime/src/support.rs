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

#![allow(dead_code)]

use crate::worker::Worker;

/// Holds preemption off on the current worker for the guard's
/// lifetime. A worker-less context (early init, foreign threads) gets
/// a no-op guard.
#[derive(Debug)]
pub(crate) struct PreemptGuard {
    worker: Option<&'static Worker>,
}

impl PreemptGuard {
    #[inline]
    pub fn new() -> Self {
        let worker = Worker::current();
        if let Some(w) = worker {
            w.preempt_disable();
        }
        Self { worker }
    }
}

impl Drop for PreemptGuard {
    #[inline]
    fn drop(&mut self) {
        if let Some(w) = self.worker {
            w.preempt_enable();
        }
    }
}

#[inline]
pub(crate) const fn align_down_size(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

#[inline]
pub(crate) const fn align_up_size(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

#[inline]
pub(crate) const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}
