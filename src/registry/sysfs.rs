use std::fs::read_to_string;
use std::io::{Error, ErrorKind, Result};
use std::path::Path;

use crate::count::CounterConfig;
use crate::hw::{pmu_type, SYSFS_PMU_ROOT};

/// Reads an event alias like `/sys/bus/event_source/devices/cpu/events/mem-loads`.
///
/// The alias is a list of `term=value` pairs, each term is mapped to its
/// config bits through the PMU's `format` directory.
pub fn event(pmu: &str, name: &str) -> Result<CounterConfig> {
    let root = Path::new(SYSFS_PMU_ROOT).join(pmu);
    let mut config = CounterConfig::new(pmu_type(pmu)?, 0);

    let alias = read_to_string(root.join("events").join(name))?;
    for term in alias.trim().split(',').filter(|it| !it.is_empty()) {
        let (key, value) = match term.split_once('=') {
            Some((key, value)) => (key.trim(), parse_int(value)?),
            None => (term.trim(), 1),
        };
        let format = read_to_string(root.join("format").join(key))?;
        apply(&mut config, &format, value)?;
    }
    Ok(config)
}

fn parse_int(value: &str) -> Result<u64> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(Error::other)
}

/// Scatters `value` into the bit ranges of a format like `config:0-7,21-23`.
pub(super) fn apply(config: &mut CounterConfig, format: &str, mut value: u64) -> Result<()> {
    let invalid = || Error::new(ErrorKind::InvalidData, format!("unknown format `{format}`"));

    let (field, ranges) = format.trim().split_once(':').ok_or_else(invalid)?;
    let word = match field {
        "config" => &mut config.config,
        "config1" => &mut config.config1,
        "config2" => &mut config.config2,
        _ => return Err(invalid()),
    };

    for range in ranges.split(',') {
        let (lo, hi) = match range.split_once('-') {
            Some((lo, hi)) => (lo.parse::<u32>(), hi.parse::<u32>()),
            None => (range.parse::<u32>(), range.parse::<u32>()),
        };
        let (Ok(lo), Ok(hi)) = (lo, hi) else {
            return Err(invalid());
        };
        if lo > hi || hi >= 64 {
            return Err(invalid());
        }
        let width = hi - lo + 1;
        let mask = match width {
            64 => u64::MAX,
            _ => (1 << width) - 1,
        };
        *word |= (value & mask) << lo;
        value = value.checked_shr(width).unwrap_or(0);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{apply, parse_int};
    use crate::count::CounterConfig;

    #[test]
    fn test_apply_format() {
        let mut config = CounterConfig::new(4, 0);
        apply(&mut config, "config:0-7\n", 0xcd).unwrap();
        apply(&mut config, "config:8-15", 0x1).unwrap();
        apply(&mut config, "config1:0-15", 3).unwrap();
        assert_eq!(config.config, 0x1cd);
        assert_eq!(config.config1, 3);
    }

    #[test]
    fn test_apply_split_ranges() {
        let mut config = CounterConfig::new(4, 0);
        // Low 4 bits go to 0-3, the rest to 32-35.
        apply(&mut config, "config:0-3,32-35", 0xab).unwrap();
        assert_eq!(config.config, 0xb | (0xa << 32));
    }

    #[test]
    fn test_apply_rejects_unknown_format() {
        let mut config = CounterConfig::new(4, 0);
        assert!(apply(&mut config, "config9:0-3", 1).is_err());
        assert!(apply(&mut config, "config:7-3", 1).is_err());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("0x1f").unwrap(), 31);
        assert_eq!(parse_int(" 12 ").unwrap(), 12);
        assert!(parse_int("z").is_err());
    }
}
