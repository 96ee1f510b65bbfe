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

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Adding into a bundle with no free slot.
    #[error("no free slot in the bundle")]
    NoSpace,

    /// Removing a thread that is not a member.
    #[error("thread is not a bundle member")]
    NotFound,

    /// Slot index at or beyond the configured bundle size.
    #[error("slot index out of range")]
    InvalidIndex,

    /// Bundle size of zero or beyond the compile-time slot cap, or an
    /// inconsistent runtime configuration.
    #[error("invalid bundle configuration")]
    InvalidConfig,

    /// The kernel control device rejected the handler registration.
    #[error("kernel handler registration failed: errno {0}")]
    KernelRegister(i32),
}

impl Error {
    pub fn to_errno(self) -> i32 {
        match self {
            Error::NoSpace => libc::ENOSPC,
            Error::NotFound => libc::ENOENT,
            Error::InvalidIndex => libc::EINVAL,
            Error::InvalidConfig => libc::EINVAL,
            Error::KernelRegister(errno) => errno,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
