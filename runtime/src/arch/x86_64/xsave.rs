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

use crate::support::is_aligned;
use core::{arch::asm, mem::MaybeUninit};
use lame_kconfig::XSAVE_AREA_SIZE;

// XSAVEC requires the 64-byte header at offset 512 to be zeroed.
const XSAVE_HEADER_OFFSET: usize = 512;
const XSAVE_HEADER_SIZE: usize = 64;

/// Scratch buffer for one compact extended-state save. Stack
/// allocated by the handler around a switch; never heap allocated.
#[repr(C, align(64))]
pub(crate) struct XsaveArea {
    data: [u8; XSAVE_AREA_SIZE],
}

/// Reads XCR0: the mask of architecturally enabled state components.
#[inline]
pub(crate) fn active_xstate_mask() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        asm!(
            "xgetbv",
            in("ecx") 0u32,
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack),
        );
    }
    ((hi as u64) << 32) | lo as u64
}

/// Compactly saves the state components in `mask` into `area`.
pub(crate) unsafe fn xsavec(area: &mut MaybeUninit<XsaveArea>, mask: u64) {
    let base = area.as_mut_ptr() as *mut u8;
    debug_assert!(is_aligned(base as usize, 64));
    // Zero the header; the component data needs no initialisation.
    core::ptr::write_bytes(base.add(XSAVE_HEADER_OFFSET), 0, XSAVE_HEADER_SIZE);
    asm!(
        "xsavec64 [{area}]",
        area = in(reg) base,
        in("eax") (mask & 0xffff_ffff) as u32,
        in("edx") (mask >> 32) as u32,
        options(nostack),
    );
}

/// Restores the state components in `mask` from `area`. The area must
/// hold a save taken with the same mask.
pub(crate) unsafe fn xrstor(area: &MaybeUninit<XsaveArea>, mask: u64) {
    let base = area.as_ptr() as *const u8;
    debug_assert!(is_aligned(base as usize, 64));
    asm!(
        "xrstor64 [{area}]",
        area = in(reg) base,
        in("eax") (mask & 0xffff_ffff) as u32,
        in("edx") (mask >> 32) as u32,
        options(nostack),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xcr0_reports_x87() {
        // Bit 0 (x87) is architecturally always set in XCR0.
        let mask = active_xstate_mask();
        assert_ne!(mask & 1, 0);
    }

    #[test]
    fn test_save_restore_round_trip() {
        if !std::arch::is_x86_feature_detected!("xsavec") {
            return;
        }
        let mask = active_xstate_mask();
        let mut area = MaybeUninit::<XsaveArea>::uninit();
        unsafe {
            xsavec(&mut area, mask);
            xrstor(&area, mask);
        }
    }
}
