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

use crate::error::{Error, Result};
use enum_iterator::{all, Sequence};
use lame_kconfig::{BUNDLE_SLOTS, DEFAULT_BITMAP_PGSZ_FACTOR};
use log::warn;

/// Switch-cost measurement mode. `Pretend` adds a fixed stall to the
/// switch body, `Nop` replaces it entirely; both expect a bundle of
/// exactly two threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Sequence)]
pub enum TscMode {
    Off,
    Pretend,
    Nop,
}

impl TscMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TscMode::Off => "off",
            TscMode::Pretend => "pretend",
            TscMode::Nop => "nop",
        }
    }
}

/// Which delivery mechanism to ask the kernel device for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Sequence)]
pub enum RegisterMode {
    None,
    Int,
    Pmu,
    Stall,
    Nop,
}

impl RegisterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterMode::None => "none",
            RegisterMode::Int => "int",
            RegisterMode::Pmu => "pmu",
            RegisterMode::Stall => "stall",
            RegisterMode::Nop => "nop",
        }
    }
}

/// The handler body installed behind the registered entry stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerVariant {
    Switch,
    SwitchPretend,
    Stall,
    Nop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub bundle_size: u32,
    pub lame_tsc: TscMode,
    pub lame_register: RegisterMode,
    pub lame_bitmap_pgsz_factor: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bundle_size: 1,
            lame_tsc: TscMode::Off,
            lame_register: RegisterMode::None,
            lame_bitmap_pgsz_factor: DEFAULT_BITMAP_PGSZ_FACTOR,
        }
    }
}

fn mode_names<T: Sequence + Copy>(name_of: fn(&T) -> &'static str) -> String {
    all::<T>()
        .map(|m| name_of(&m).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

impl Config {
    /// Parses Caladan-style `key value` lines. Unknown keys are
    /// ignored with a warning so one config file can feed several
    /// subsystems.
    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                warn!("malformed config line: {line:?}");
                return Err(Error::InvalidConfig);
            };
            match key {
                "bundle_size" => {
                    cfg.bundle_size = val.parse().map_err(|_| {
                        warn!("bundle_size must be an integer, got {val:?}");
                        Error::InvalidConfig
                    })?;
                }
                "lame_tsc" => {
                    cfg.lame_tsc = all::<TscMode>()
                        .find(|m| m.as_str() == val)
                        .ok_or_else(|| {
                            warn!(
                                "lame_tsc must be one of {}, got {val:?}",
                                mode_names::<TscMode>(TscMode::as_str)
                            );
                            Error::InvalidConfig
                        })?;
                }
                "lame_register" => {
                    cfg.lame_register = all::<RegisterMode>()
                        .find(|m| m.as_str() == val)
                        .ok_or_else(|| {
                            warn!(
                                "lame_register must be one of {}, got {val:?}",
                                mode_names::<RegisterMode>(RegisterMode::as_str)
                            );
                            Error::InvalidConfig
                        })?;
                }
                "lame_bitmap_pgsz_factor" => {
                    cfg.lame_bitmap_pgsz_factor = val.parse().map_err(|_| {
                        warn!("lame_bitmap_pgsz_factor must be an integer, got {val:?}");
                        Error::InvalidConfig
                    })?;
                }
                _ => warn!("ignoring unknown config key {key:?}"),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bundle_size == 0 || self.bundle_size as usize > BUNDLE_SLOTS {
            warn!(
                "bundle_size {} outside 1..={}",
                self.bundle_size, BUNDLE_SLOTS
            );
            return Err(Error::InvalidConfig);
        }
        // Switch-cost measurement only makes sense ping-ponging
        // between exactly two threads.
        if self.lame_tsc != TscMode::Off && self.bundle_size != 2 {
            warn!(
                "lame_tsc {} requires bundle_size 2, got {}",
                self.lame_tsc.as_str(),
                self.bundle_size
            );
            return Err(Error::InvalidConfig);
        }
        // Measurement bodies ride the counter-overflow return path;
        // `INT` delivery has no registration tag for them.
        if self.lame_tsc != TscMode::Off && self.lame_register == RegisterMode::Int {
            warn!(
                "lame_tsc {} requires pmu delivery, got lame_register int",
                self.lame_tsc.as_str()
            );
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// Resolves the handler body from the registration and
    /// measurement modes.
    pub fn handler_variant(&self) -> HandlerVariant {
        match self.lame_register {
            RegisterMode::Stall => HandlerVariant::Stall,
            RegisterMode::Nop => HandlerVariant::Nop,
            _ => match self.lame_tsc {
                TscMode::Off => HandlerVariant::Switch,
                TscMode::Pretend => HandlerVariant::SwitchPretend,
                TscMode::Nop => HandlerVariant::Nop,
            },
        }
    }

    #[inline]
    pub fn bitmap_enabled(&self) -> bool {
        self.lame_bitmap_pgsz_factor >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.bundle_size, 1);
        assert_eq!(cfg.lame_tsc, TscMode::Off);
        assert_eq!(cfg.lame_register, RegisterMode::None);
        assert!(!cfg.bitmap_enabled());
    }

    #[test]
    fn test_parse_full() {
        let cfg = Config::parse(
            "# runtime knobs\n\
             bundle_size 4\n\
             lame_tsc off\n\
             lame_register pmu\n\
             lame_bitmap_pgsz_factor 12\n",
        )
        .unwrap();
        assert_eq!(cfg.bundle_size, 4);
        assert_eq!(cfg.lame_register, RegisterMode::Pmu);
        assert_eq!(cfg.lame_bitmap_pgsz_factor, 12);
        assert!(cfg.bitmap_enabled());
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert_eq!(
            Config::parse("bundle_size zero").unwrap_err(),
            Error::InvalidConfig
        );
        assert_eq!(
            Config::parse("lame_tsc sometimes").unwrap_err(),
            Error::InvalidConfig
        );
        assert_eq!(
            Config::parse("bundle_size 0").unwrap_err(),
            Error::InvalidConfig
        );
        assert_eq!(
            Config::parse(&format!("bundle_size {}", BUNDLE_SLOTS + 1)).unwrap_err(),
            Error::InvalidConfig
        );
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let cfg = Config::parse("runtime_kthreads 4\nbundle_size 2\n").unwrap();
        assert_eq!(cfg.bundle_size, 2);
    }

    #[test]
    fn test_tsc_mode_needs_pair_bundle() {
        let cfg = Config::parse("lame_tsc pretend\nbundle_size 2\n").unwrap();
        assert_eq!(cfg.handler_variant(), HandlerVariant::SwitchPretend);
        assert_eq!(
            Config::parse("lame_tsc pretend\nbundle_size 3\n").unwrap_err(),
            Error::InvalidConfig
        );
    }

    #[test]
    fn test_tsc_mode_rejects_int_delivery() {
        assert_eq!(
            Config::parse("lame_tsc pretend\nlame_register int\nbundle_size 2\n").unwrap_err(),
            Error::InvalidConfig
        );
        assert_eq!(
            Config::parse("lame_tsc nop\nlame_register int\nbundle_size 2\n").unwrap_err(),
            Error::InvalidConfig
        );
        let cfg = Config::parse("lame_tsc pretend\nlame_register pmu\nbundle_size 2\n").unwrap();
        assert_eq!(cfg.handler_variant(), HandlerVariant::SwitchPretend);
    }

    #[test]
    fn test_variant_resolution() {
        let mut cfg = Config::default();
        cfg.lame_register = RegisterMode::Stall;
        assert_eq!(cfg.handler_variant(), HandlerVariant::Stall);
        cfg.lame_register = RegisterMode::Nop;
        assert_eq!(cfg.handler_variant(), HandlerVariant::Nop);
        cfg.lame_register = RegisterMode::Pmu;
        assert_eq!(cfg.handler_variant(), HandlerVariant::Switch);
    }
}
