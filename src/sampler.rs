use crate::util::now_rfc3339;
use anyhow::{Result, bail};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use sysinfo::{CpuExt, System, SystemExt};
use tracing::{debug, info, warn};

pub const MEMORY_CRITICAL: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_fraction: f64,
    pub memory_fraction: f64,
    pub timestamp: String,
    /// Set when the measurement failed and this is the previous reading.
    pub stale: bool,
}

impl ResourceSnapshot {
    pub fn new(cpu_fraction: f64, memory_fraction: f64) -> Self {
        Self {
            cpu_fraction: cpu_fraction.clamp(0.0, 1.0),
            memory_fraction: memory_fraction.clamp(0.0, 1.0),
            timestamp: now_rfc3339(),
            stale: false,
        }
    }

    fn as_stale(&self) -> Self {
        Self {
            stale: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub cpu_fraction: f64,
    pub memory_fraction: f64,
}

/// Source of raw host utilization.
pub trait ResourceProbe: Send {
    fn measure(&mut self) -> Result<Measurement>;
}

/// Host probe backed by `sysinfo`. The first CPU reading after construction
/// is 0 because usage is computed between two refreshes.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn measure(&mut self) -> Result<Measurement> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            bail!("total memory reported as 0");
        }
        Ok(Measurement {
            cpu_fraction: self.system.global_cpu_info().cpu_usage() as f64 / 100.0,
            memory_fraction: self.system.used_memory() as f64 / total as f64,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub memory_threshold: f64,
    pub history_len: usize,
    /// Longest `sample()` waits for a concurrent measurement to finish.
    pub lock_timeout: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            memory_threshold: 0.8,
            history_len: 32,
            lock_timeout: Duration::from_millis(50),
        }
    }
}

/// One per batch. Keeps the latest snapshot plus a bounded history.
pub struct ResourceSampler {
    probe: Mutex<Box<dyn ResourceProbe>>,
    latest: Mutex<ResourceSnapshot>,
    history: Mutex<VecDeque<ResourceSnapshot>>,
    settings: SamplerSettings,
}

impl ResourceSampler {
    pub fn new(probe: Box<dyn ResourceProbe>, settings: SamplerSettings) -> Self {
        Self {
            probe: Mutex::new(probe),
            latest: Mutex::new(ResourceSnapshot {
                cpu_fraction: 0.0,
                memory_fraction: 0.0,
                timestamp: now_rfc3339(),
                stale: true,
            }),
            history: Mutex::new(VecDeque::with_capacity(settings.history_len)),
            settings,
        }
    }

    /// Never fails: a failed or contended measurement returns the previous
    /// snapshot flagged stale.
    pub fn sample(&self) -> ResourceSnapshot {
        let measured = match self.probe.try_lock_for(self.settings.lock_timeout) {
            Some(mut probe) => probe.measure(),
            None => {
                debug!("resource probe busy; reusing previous snapshot");
                return self.latest.lock().as_stale();
            }
        };

        match measured {
            Ok(m) => {
                let snapshot = ResourceSnapshot::new(m.cpu_fraction, m.memory_fraction);
                self.log_pressure(&snapshot);
                *self.latest.lock() = snapshot.clone();
                if self.settings.history_len > 0 {
                    let mut history = self.history.lock();
                    if history.len() == self.settings.history_len {
                        history.pop_front();
                    }
                    history.push_back(snapshot.clone());
                }
                snapshot
            }
            Err(err) => {
                warn!("resource measurement failed: {err:#}");
                self.latest.lock().as_stale()
            }
        }
    }

    pub fn latest(&self) -> ResourceSnapshot {
        self.latest.lock().clone()
    }

    pub fn history(&self) -> Vec<ResourceSnapshot> {
        self.history.lock().iter().cloned().collect()
    }

    fn log_pressure(&self, s: &ResourceSnapshot) {
        if s.memory_fraction >= MEMORY_CRITICAL {
            warn!(
                memory = s.memory_fraction,
                cpu = s.cpu_fraction,
                "memory pressure CRITICAL"
            );
        } else if s.memory_fraction >= self.settings.memory_threshold {
            info!(
                memory = s.memory_fraction,
                cpu = s.cpu_fraction,
                "memory pressure HIGH"
            );
        }
    }
}
