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

pub(crate) mod switch;
pub(crate) mod trap;
pub(crate) mod xsave;

pub(crate) use switch::{switch_frames, Frame};
pub(crate) use xsave::{active_xstate_mask, xrstor, xsavec, XsaveArea};

#[inline(always)]
pub(crate) fn read_tsc() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[inline(always)]
pub(crate) fn cpu_relax() {
    unsafe { core::arch::x86_64::_mm_pause() }
}
