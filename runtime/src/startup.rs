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

use crate::{config::{Config, RegisterMode}, error::Result, logger, register, sites};
use log::{info, warn};

/// Process-level bring-up: logging, the live-site map, and handler
/// registration. A rejected registration is not fatal; the runtime
/// proceeds with switching disabled.
pub fn init(cfg: &Config) -> Result<()> {
    logger::logger_init();
    cfg.validate()?;
    if cfg.bitmap_enabled() {
        if let Err(err) = sites::load_sidecar(cfg.lame_bitmap_pgsz_factor as u32) {
            warn!("live-site map unavailable: {err}");
        }
    }
    if let Err(err) = register::register(cfg) {
        warn!("handler registration failed, continuing without switching: {err}");
        return Ok(());
    }
    if cfg.lame_register != RegisterMode::None {
        info!(
            "switch tick registered: mode {}, bundle size {}",
            cfg.lame_register.as_str(),
            cfg.bundle_size
        );
    }
    Ok(())
}
