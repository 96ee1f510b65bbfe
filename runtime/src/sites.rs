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

//! Program-counter sites where extended (floating/vector) state is
//! live, collapsed into a byte-per-page map over the text segment. The
//! switching handler consults it to skip the extended-state save; with
//! no map installed every site conservatively needs one.

use crate::error::{Error, Result};
use log::{info, warn};
use spin::RwLock;
use std::path::Path;
use zerocopy::{
    byteorder::{LittleEndian, U64},
    FromBytes, Immutable, KnownLayout,
};

static SITES: RwLock<Option<SiteBitmap>> = RwLock::new(None);

/// One record of the headerless sidecar file: a half-open byte range
/// relative to the text start.
#[derive(FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct SiteRange {
    start: U64<LittleEndian>,
    end: U64<LittleEndian>,
}

#[derive(Debug)]
pub struct SiteBitmap {
    pgsz_factor: u32,
    text_start: u64,
    map: Vec<u8>,
}

impl SiteBitmap {
    /// Builds the map from `(start, end)` byte ranges relative to the
    /// text start. A range marks every page it touches, so sub-page
    /// ranges are still represented.
    pub fn from_ranges(ranges: &[(u64, u64)], pgsz_factor: u32, text_start: u64, text_len: u64) -> Self {
        let pages = (text_len >> pgsz_factor) + 1;
        let mut map = vec![0u8; pages as usize];
        for &(start, end) in ranges {
            let end = end.min(text_len);
            if start >= end {
                continue;
            }
            let first = (start >> pgsz_factor) as usize;
            let last = ((end - 1) >> pgsz_factor) as usize;
            for page in map.iter_mut().take(last + 1).skip(first) {
                *page = 1;
            }
        }
        Self {
            pgsz_factor,
            text_start,
            map,
        }
    }

    /// Parses a sidecar file: a sequence of little-endian
    /// `(start: u64, end: u64)` pairs, no header.
    pub fn from_sidecar(
        path: &Path,
        pgsz_factor: u32,
        text_start: u64,
        text_len: u64,
    ) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|_| Error::InvalidConfig)?;
        if bytes.len() % core::mem::size_of::<SiteRange>() != 0 {
            warn!(
                "site file {} has trailing bytes ({} total)",
                path.display(),
                bytes.len()
            );
            return Err(Error::InvalidConfig);
        }
        let records =
            <[SiteRange]>::ref_from_bytes(&bytes).map_err(|_| Error::InvalidConfig)?;
        let ranges: Vec<(u64, u64)> = records
            .iter()
            .map(|r| (r.start.get(), r.end.get()))
            .collect();
        Ok(Self::from_ranges(&ranges, pgsz_factor, text_start, text_len))
    }

    /// Whether the page holding `pc` contains a live-state site.
    /// Anything outside the mapped text answers yes.
    pub fn covers(&self, pc: u64) -> bool {
        if pc < self.text_start {
            return true;
        }
        let idx = ((pc - self.text_start) >> self.pgsz_factor) as usize;
        self.map.get(idx).map_or(true, |b| *b != 0)
    }
}

/// Installs the process-wide map consulted by the switching handler.
pub fn install(bitmap: SiteBitmap) {
    *SITES.write() = Some(bitmap);
}

/// Whether the handler must save extended state for an interrupt at
/// `pc`. Conservative without an installed map.
#[inline]
pub fn needs_xsave(pc: u64) -> bool {
    match SITES.read().as_ref() {
        None => true,
        Some(bitmap) => bitmap.covers(pc),
    }
}

// The linker places these at the bounds of the executable image's
// text.
extern "C" {
    static __executable_start: u8;
    static etext: u8;
}

fn text_bounds() -> (u64, u64) {
    unsafe {
        let start = &raw const __executable_start as u64;
        let end = &raw const etext as u64;
        (start, end.saturating_sub(start))
    }
}

/// Loads `<current exe>.sites` if present. A missing sidecar is not an
/// error: the handler just stays conservative.
pub fn load_sidecar(pgsz_factor: u32) -> Result<()> {
    let Ok(exe) = std::env::current_exe() else {
        return Err(Error::InvalidConfig);
    };
    let path = exe.with_extension("sites");
    if !path.exists() {
        info!(
            "no site file at {}; saving extended state on every switch",
            path.display()
        );
        return Ok(());
    }
    let (text_start, text_len) = text_bounds();
    let bitmap = SiteBitmap::from_sidecar(&path, pgsz_factor, text_start, text_len)?;
    install(bitmap);
    Ok(())
}
