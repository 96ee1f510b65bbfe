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

//! Handler registration against the kernel control device. The device
//! takes an entry-stub address and arms either the `INT`-vector or the
//! counter-overflow delivery path for the calling process.

use crate::{
    arch::trap,
    config::{Config, HandlerVariant, RegisterMode},
    error::{Error, Result},
};
use core::{ffi::CStr, sync::atomic::{AtomicBool, Ordering}};

const LAME_DEV: &CStr = c"/dev/lame";

/// Set once the device accepted a handler; the runtime consults this
/// to know whether the tick may ever land.
static LAME_ACTIVE: AtomicBool = AtomicBool::new(false);

#[repr(C)]
struct LameRegistration {
    present: u64,
    handler_addr: u64,
}

const fn iow(ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    const IOC_WRITE: libc::c_ulong = 1;
    (IOC_WRITE << 30)
        | ((size as libc::c_ulong) << 16)
        | ((ty as libc::c_ulong) << 8)
        | nr as libc::c_ulong
}

const LAME_IOC_REG_INT: libc::c_ulong = iow(b'l', 1, core::mem::size_of::<LameRegistration>());
const LAME_IOC_REG_PMU: libc::c_ulong = iow(b'l', 2, core::mem::size_of::<LameRegistration>());

#[inline]
pub fn is_active() -> bool {
    LAME_ACTIVE.load(Ordering::Acquire)
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

fn ioctl_register(request: libc::c_ulong, payload: &LameRegistration) -> Result<()> {
    let fd = unsafe { libc::open(LAME_DEV.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(Error::KernelRegister(last_errno()));
    }
    let rc = unsafe { libc::ioctl(fd, request, payload as *const LameRegistration) };
    let err = (rc < 0).then(last_errno);
    unsafe { libc::close(fd) };
    match err {
        Some(errno) => Err(Error::KernelRegister(errno)),
        None => Ok(()),
    }
}

/// Hands the kernel device the entry stub matching the configured
/// delivery mode and handler body. `RegisterMode::None` leaves the
/// core inert without touching the device.
pub fn register(cfg: &Config) -> Result<()> {
    cfg.validate()?;
    if cfg.lame_register == RegisterMode::None {
        return Ok(());
    }
    let variant = cfg.handler_variant();
    let (request, entry): (libc::c_ulong, unsafe extern "C" fn()) =
        match (cfg.lame_register, variant) {
            (RegisterMode::Int, _) => (LAME_IOC_REG_INT, trap::lame_trap_entry_int),
            (RegisterMode::Pmu, HandlerVariant::SwitchPretend) => {
                (LAME_IOC_REG_PMU, trap::lame_trap_entry_pmu_pretend)
            }
            (RegisterMode::Pmu, HandlerVariant::Nop) => {
                (LAME_IOC_REG_PMU, trap::lame_trap_entry_pmu_nop)
            }
            (RegisterMode::Pmu, _) => (LAME_IOC_REG_PMU, trap::lame_trap_entry_pmu),
            (RegisterMode::Stall, _) => (LAME_IOC_REG_PMU, trap::lame_trap_entry_pmu_stall),
            (RegisterMode::Nop, _) => (LAME_IOC_REG_PMU, trap::lame_trap_entry_pmu_nop),
            (RegisterMode::None, _) => unreachable!(),
        };
    let payload = LameRegistration {
        present: 1,
        handler_addr: entry as usize as u64,
    };
    ioctl_register(request, &payload)?;
    LAME_ACTIVE.store(true, Ordering::Release);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TscMode;

    #[test]
    fn test_mode_none_skips_device() {
        let cfg = Config::default();
        register(&cfg).unwrap();
        assert!(!is_active());
    }

    #[test]
    fn test_missing_device_reports_errno() {
        // No kernel module loaded in the test environment.
        let cfg = Config {
            bundle_size: 4,
            lame_register: RegisterMode::Pmu,
            ..Config::default()
        };
        match register(&cfg) {
            Err(Error::KernelRegister(errno)) => assert_eq!(errno, libc::ENOENT),
            other => panic!("expected registration failure, got {other:?}"),
        }
        assert!(!is_active());
    }

    #[test]
    fn test_mismatched_measurement_config_rejected() {
        let cfg = Config {
            bundle_size: 4,
            lame_register: RegisterMode::Pmu,
            lame_tsc: TscMode::Pretend,
            ..Config::default()
        };
        assert_eq!(register(&cfg).unwrap_err(), Error::InvalidConfig);
        // Measurement bodies have no INT registration tag.
        let cfg = Config {
            bundle_size: 2,
            lame_register: RegisterMode::Int,
            lame_tsc: TscMode::Pretend,
            ..Config::default()
        };
        assert_eq!(register(&cfg).unwrap_err(), Error::InvalidConfig);
    }

    #[test]
    fn test_ioctl_encoding_is_write_direction() {
        assert_eq!(LAME_IOC_REG_INT >> 30, 1);
        assert_eq!((LAME_IOC_REG_INT >> 16) & 0x3fff, 16);
        assert_ne!(LAME_IOC_REG_INT, LAME_IOC_REG_PMU);
    }
}
