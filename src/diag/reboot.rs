//! Reboot counter and reboot log
//!
//! The `reboot` configuration handler holds the number of hard reboots (`reboot_cnt`) and whether
//! the last reset was requested by software (`soft_reboot`). Both are 16 bit values kept as
//! decimal strings. Every reboot that counts is appended to a reboot log.

use super::log::CircularLog;
use super::{ConfHandler, ConfRegistry, ExportTarget};
use crate::Error;
use core::fmt;
use serde::{Deserialize, Serialize};

/// The reason of a reset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetReason {
    PowerOn,
    Pin,
    Watchdog,
    /// A reset of the processor by software
    Soft,
    Brownout,
    /// A restart requested by the user
    Requested,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ResetReason::PowerOn => "POWER_ON",
            ResetReason::Pin => "HARD",
            ResetReason::Watchdog => "WDOG",
            ResetReason::Soft => "SOFT",
            ResetReason::Brownout => "BROWNOUT",
            ResetReason::Requested => "REQUESTED",
        };

        f.write_str(s)
    }
}

/// The version of the running image
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub build_num: u32,
}

/// An entry of the reboot log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebootRecord {
    pub reason: ResetReason,
    pub count: u16,
    pub image: ImageVersion,
}

impl fmt::Display for RebootRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "rsn:{}, cnt:{}, img:{}.{}.{}.{}",
            self.reason,
            self.count,
            self.image.major,
            self.image.minor,
            self.image.revision,
            self.image.build_num
        )
    }
}

/// The `reboot` configuration handler
#[derive(Clone, Debug, Default)]
pub struct RebootLog {
    reboot_cnt: u16,
    soft_reboot: u16,
    reboot_cnt_str: String,
    soft_reboot_str: String,
}

impl RebootLog {
    pub const NAME: &'static str = "reboot";

    const REBOOT_CNT: &'static str = "reboot/reboot_cnt";
    const SOFT_REBOOT: &'static str = "reboot/soft_reboot";

    pub fn new() -> Self {
        RebootLog::default()
    }

    fn parse(value: &str) -> Result<u16, Error> {
        value
            .trim()
            .parse()
            .map_err(|_| Error::Decode(format!("{:?} is not a 16 bit value", value)))
    }

    fn registered_value(registry: &ConfRegistry, name: &str) -> Result<u16, Error> {
        match registry.get(name)? {
            Some(value) if !value.is_empty() => Self::parse(&value),
            _ => Ok(0),
        }
    }

    /// Log a reboot
    ///
    /// The counters are read from and saved through `registry`, where a `RebootLog` must be
    /// registered. A requested restart saves the soft reboot flag so that the software reset that
    /// follows it is not counted. The record appended to `log` is returned, `None` is returned for
    /// a software reset after a requested restart.
    pub fn log_reboot(
        registry: &mut ConfRegistry,
        log: &mut CircularLog,
        reason: ResetReason,
        image: ImageVersion,
    ) -> Result<Option<RebootRecord>, Error> {
        let reboot_cnt = Self::registered_value(registry, Self::REBOOT_CNT)?;

        let soft_reboot = Self::registered_value(registry, Self::SOFT_REBOOT)?;

        let count = if reason == ResetReason::Requested {
            registry.save(Self::SOFT_REBOOT, "1")?;

            reboot_cnt.wrapping_add(1)
        } else {
            registry.save(Self::SOFT_REBOOT, "0")?;

            if soft_reboot != 0 && reason == ResetReason::Soft {
                log::debug!("software reset after a requested restart is not logged");

                return Ok(None);
            }

            let count = reboot_cnt.wrapping_add(1);

            registry.set(Self::REBOOT_CNT, &count.to_string())?;

            count
        };

        registry.save(Self::REBOOT_CNT, &count.to_string())?;

        let record = RebootRecord { reason, count, image };

        log::error!(target: "reboot_log", "{}", record);

        log.append(&record)?;

        Ok(Some(record))
    }
}

impl ConfHandler for RebootLog {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn get(&self, key: &str) -> Option<String> {
        match key {
            "reboot_cnt" => Some(self.reboot_cnt_str.clone()),
            "soft_reboot" => Some(self.soft_reboot_str.clone()),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "reboot_cnt" => {
                self.reboot_cnt = Self::parse(value)?;
                self.reboot_cnt_str = value.to_string();
            }
            "soft_reboot" => {
                self.soft_reboot = Self::parse(value)?;
                self.soft_reboot_str = value.to_string();
            }
            _ => return Err(Error::InvalidParameter("unknown reboot key")),
        }

        Ok(())
    }

    fn export(&self, target: ExportTarget, sink: &mut dyn FnMut(&str, &str)) {
        if target == ExportTarget::Show {
            sink(Self::REBOOT_CNT, &self.reboot_cnt_str);
            sink(Self::SOFT_REBOOT, &self.soft_reboot_str);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::diag::{ConfStore, MemoryStore};

    const IMAGE: ImageVersion = ImageVersion {
        major: 1,
        minor: 2,
        revision: 3,
        build_num: 4,
    };

    /// Boot the way a device does, loading the stored values before logging the reboot
    fn boot(store: &MemoryStore, log: &mut CircularLog, reason: ResetReason) -> (MemoryStore, Option<RebootRecord>) {
        let mut registry = ConfRegistry::new(store.clone());

        registry.register(RebootLog::new()).unwrap();
        registry.load().unwrap();

        let record = RebootLog::log_reboot(&mut registry, log, reason, IMAGE).unwrap();

        let mut saved = MemoryStore::new();

        for (name, value) in registry.stored() {
            saved.save(&name, &value).unwrap();
        }

        (saved, record)
    }

    #[test]
    fn hard_reboots_are_counted() {
        let mut log = CircularLog::new(4);

        let (store, first) = boot(&MemoryStore::new(), &mut log, ResetReason::PowerOn);
        let (store, second) = boot(&store, &mut log, ResetReason::Watchdog);

        assert_eq!(Some(1), first.map(|r| r.count));
        assert_eq!(Some(2), second.map(|r| r.count));
        assert_eq!(Some("2"), store.value("reboot/reboot_cnt"));
        assert_eq!(2, log.len());
    }

    #[test]
    fn requested_restart_is_counted_once() {
        let mut log = CircularLog::new(4);

        let (store, _) = boot(&MemoryStore::new(), &mut log, ResetReason::PowerOn);
        let (store, requested) = boot(&store, &mut log, ResetReason::Requested);
        let (store, soft) = boot(&store, &mut log, ResetReason::Soft);

        assert_eq!(Some(2), requested.map(|r| r.count));
        assert_eq!(None, soft);
        assert_eq!(Some("2"), store.value("reboot/reboot_cnt"));
        assert_eq!(Some("0"), store.value("reboot/soft_reboot"));

        let (_, next) = boot(&store, &mut log, ResetReason::Soft);

        assert_eq!(Some(3), next.map(|r| r.count));
    }

    #[test]
    fn record_format() {
        let record = RebootRecord {
            reason: ResetReason::Requested,
            count: 7,
            image: IMAGE,
        };

        assert_eq!("rsn:REQUESTED, cnt:7, img:1.2.3.4", record.to_string());
    }

    #[test]
    fn only_shown() {
        let mut reboot = RebootLog::new();

        reboot.set("reboot_cnt", "12").unwrap();

        let mut shown = Vec::new();

        reboot.export(ExportTarget::Show, &mut |name, value| shown.push((name.to_string(), value.to_string())));
        reboot.export(ExportTarget::Persist, &mut |_, _| panic!("reboot values are not persisted by export"));

        assert_eq!(("reboot/reboot_cnt".to_string(), "12".to_string()), shown[0]);
        assert!(reboot.set("reboot_cnt", "x").is_err());
    }
}
