//! Energy Counters - Cumulative hardware energy readings
//!
//! On Linux, Intel RAPL exposes per-domain cumulative microjoule counters
//! under `/sys/class/powercap`. Counters wrap at `max_energy_range_uj`.

use crate::error::{CarbonQueryError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const POWERCAP_ROOT: &str = "/sys/class/powercap";

/// One energy domain at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainReading {
    pub name: String,
    pub energy_uj: u64,

    /// Value at which the counter wraps back to zero
    pub max_range_uj: u64,
}

/// All domains of a counter at one instant
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnergySnapshot {
    pub domains: Vec<DomainReading>,
}

impl EnergySnapshot {
    /// Joules consumed between `earlier` and this snapshot, summed over domains
    pub fn joules_since(&self, earlier: &EnergySnapshot) -> f64 {
        let micro: u128 = self
            .domains
            .iter()
            .filter_map(|now| {
                earlier
                    .domains
                    .iter()
                    .find(|before| before.name == now.name)
                    .map(|before| counter_delta(before.energy_uj, now.energy_uj, now.max_range_uj))
            })
            .sum();
        micro as f64 / 1_000_000.0
    }
}

/// Delta of a wrapping counter
fn counter_delta(before: u64, after: u64, max_range: u64) -> u128 {
    if after >= before {
        u128::from(after - before)
    } else {
        u128::from(max_range.saturating_sub(before)) + u128::from(after)
    }
}

/// Source of cumulative energy readings
pub trait EnergyCounter: Send + Sync {
    /// Backend name recorded as measurement provenance
    fn name(&self) -> &'static str;

    /// Whether readings are modelled rather than read from hardware
    fn is_estimate(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Result<EnergySnapshot>;
}

#[derive(Debug, Clone)]
struct RaplDomain {
    name: String,
    dir: PathBuf,
    max_range_uj: u64,
}

/// Package + DRAM counters from the powercap sysfs tree
#[derive(Debug, Clone)]
pub struct RaplCounter {
    domains: Vec<RaplDomain>,
}

impl RaplCounter {
    /// Discover readable RAPL domains, `None` if there are none
    pub fn detect() -> Option<Self> {
        Self::detect_in(Path::new(POWERCAP_ROOT))
    }

    pub fn detect_in(root: &Path) -> Option<Self> {
        let entries = fs::read_dir(root).ok()?;

        let mut packages: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(is_package_zone)
                    .unwrap_or(false)
            })
            .collect();
        packages.sort();

        let mut domains = Vec::new();
        for package in packages {
            if let Some(domain) = read_domain(&package) {
                domains.push(domain);
            }
            domains.extend(dram_subdomains(&package));
        }

        if domains.is_empty() {
            debug!("No readable RAPL domains under {}", root.display());
            return None;
        }

        info!(
            "Energy profiling: using Intel RAPL ({})",
            domains.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Some(Self { domains })
    }

    pub fn domain_names(&self) -> Vec<String> {
        self.domains.iter().map(|d| d.name.clone()).collect()
    }
}

impl EnergyCounter for RaplCounter {
    fn name(&self) -> &'static str {
        "intel_rapl"
    }

    fn snapshot(&self) -> Result<EnergySnapshot> {
        let domains = self
            .domains
            .iter()
            .map(|d| {
                Ok(DomainReading {
                    name: d.name.clone(),
                    energy_uj: read_u64(&d.dir.join("energy_uj"))?,
                    max_range_uj: d.max_range_uj,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EnergySnapshot { domains })
    }
}

/// `intel-rapl:0` is a package zone, `intel-rapl:0:1` is a subzone
fn is_package_zone(name: &str) -> bool {
    name.strip_prefix("intel-rapl:")
        .map(|rest| !rest.is_empty() && !rest.contains(':'))
        .unwrap_or(false)
}

fn read_domain(dir: &Path) -> Option<RaplDomain> {
    let label = fs::read_to_string(dir.join("name")).ok()?.trim().to_string();
    // unreadable counters (permission denied) are skipped
    read_u64(&dir.join("energy_uj")).ok()?;
    let max_range_uj = read_u64(&dir.join("max_energy_range_uj")).unwrap_or(u64::MAX);
    let zone = dir.file_name()?.to_string_lossy().to_string();

    Some(RaplDomain {
        name: format!("{}/{}", zone, label),
        dir: dir.to_path_buf(),
        max_range_uj,
    })
}

fn dram_subdomains(package: &Path) -> Vec<RaplDomain> {
    let entries = match fs::read_dir(package) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut subdomains: Vec<RaplDomain> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| read_domain(&p))
        .filter(|d| d.name.ends_with("/dram"))
        .collect();
    subdomains.sort_by(|a, b| a.name.cmp(&b.name));
    subdomains
}

fn read_u64(path: &Path) -> Result<u64> {
    let raw = fs::read_to_string(path)?;
    raw.trim().parse::<u64>().map_err(|e| {
        CarbonQueryError::Profiling(format!("Invalid counter value in {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(name: &str, energy_uj: u64, max_range_uj: u64) -> DomainReading {
        DomainReading {
            name: name.to_string(),
            energy_uj,
            max_range_uj,
        }
    }

    #[test]
    fn test_delta_sums_matching_domains() {
        let before = EnergySnapshot {
            domains: vec![reading("pkg", 1_000_000, u64::MAX), reading("dram", 500_000, u64::MAX)],
        };
        let after = EnergySnapshot {
            domains: vec![reading("pkg", 3_500_000, u64::MAX), reading("dram", 1_000_000, u64::MAX)],
        };
        assert!((after.joules_since(&before) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_delta_handles_wraparound() {
        let before = EnergySnapshot {
            domains: vec![reading("pkg", 9_000_000, 10_000_000)],
        };
        let after = EnergySnapshot {
            domains: vec![reading("pkg", 500_000, 10_000_000)],
        };
        assert!((after.joules_since(&before) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_package_zone_names() {
        assert!(is_package_zone("intel-rapl:0"));
        assert!(is_package_zone("intel-rapl:1"));
        assert!(!is_package_zone("intel-rapl:0:2"));
        assert!(!is_package_zone("intel-rapl:"));
        assert!(!is_package_zone("dtpm"));
    }

    #[test]
    fn test_detect_in_fake_sysfs_tree() {
        let root = std::env::temp_dir().join(format!("carbon-query-rapl-{}", uuid::Uuid::new_v4()));
        let package = root.join("intel-rapl:0");
        let dram = package.join("intel-rapl:0:1");
        let core = package.join("intel-rapl:0:0");
        for (dir, name, energy) in [(&package, "package-0", "1000"), (&dram, "dram", "200"), (&core, "core", "50")] {
            fs::create_dir_all(dir).unwrap();
            fs::write(dir.join("name"), format!("{}\n", name)).unwrap();
            fs::write(dir.join("energy_uj"), energy).unwrap();
            fs::write(dir.join("max_energy_range_uj"), "262143328850").unwrap();
        }

        let counter = RaplCounter::detect_in(&root).unwrap();
        assert_eq!(
            counter.domain_names(),
            vec!["intel-rapl:0/package-0".to_string(), "intel-rapl:0:1/dram".to_string()]
        );

        let first = counter.snapshot().unwrap();
        fs::write(package.join("energy_uj"), "3001000").unwrap();
        let second = counter.snapshot().unwrap();
        assert!((second.joules_since(&first) - 3.0).abs() < 1e-12);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_detect_in_missing_root() {
        assert!(RaplCounter::detect_in(Path::new("/definitely/not/powercap")).is_none());
    }
}
