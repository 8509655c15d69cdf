//! 资源探针：读取当前进程的内存 / CPU 与网络吞吐
//!
//! SystemProbe 基于 sysinfo；测试用 FixedProbe 返回可控读数。

use std::sync::{Arc, Mutex};

use sysinfo::{Networks, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// 一次探测读数
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeReading {
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub network_kb: f64,
}

pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ProbeReading;
}

struct ProbeState {
    system: System,
    networks: Networks,
    pid: Option<Pid>,
}

/// 进程级探针；取不到当前 PID 时退化为整机内存 / CPU
pub struct SystemProbe {
    state: Mutex<ProbeState>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("Cannot resolve current pid, sampling system-wide: {}", e);
                None
            }
        };
        Self {
            state: Mutex::new(ProbeState {
                system: System::new(),
                networks: Networks::new_with_refreshed_list(),
                pid,
            }),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

impl ResourceProbe for SystemProbe {
    fn sample(&self) -> ProbeReading {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let ProbeState {
            system,
            networks,
            pid,
        } = &mut *guard;

        let (memory_mb, cpu_percent) = match pid {
            Some(pid) => {
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[*pid]),
                    true,
                    ProcessRefreshKind::new().with_memory().with_cpu(),
                );
                system
                    .process(*pid)
                    .map(|p| (p.memory() as f64 / BYTES_PER_MB, p.cpu_usage() as f64))
                    .unwrap_or_default()
            }
            None => {
                system.refresh_memory();
                system.refresh_cpu_all();
                (
                    system.used_memory() as f64 / BYTES_PER_MB,
                    system.global_cpu_usage() as f64,
                )
            }
        };

        networks.refresh();
        let bytes: u64 = networks
            .list()
            .values()
            .map(|data| data.received() + data.transmitted())
            .sum();

        ProbeReading {
            memory_mb,
            cpu_percent,
            network_kb: bytes as f64 / 1024.0,
        }
    }
}

/// 固定读数探针，可在运行中修改
#[derive(Clone, Default)]
pub struct FixedProbe {
    reading: Arc<Mutex<ProbeReading>>,
}

impl FixedProbe {
    pub fn new(reading: ProbeReading) -> Self {
        Self {
            reading: Arc::new(Mutex::new(reading)),
        }
    }

    pub fn set(&self, reading: ProbeReading) {
        *self.reading.lock().unwrap_or_else(|e| e.into_inner()) = reading;
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> ProbeReading {
        *self.reading.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_probe_reports_non_negative() {
        let probe = SystemProbe::new();
        let reading = probe.sample();
        assert!(reading.memory_mb >= 0.0);
        assert!(reading.cpu_percent >= 0.0);
        assert!(reading.network_kb >= 0.0);
    }

    #[test]
    fn test_fixed_probe_can_be_updated() {
        let probe = FixedProbe::new(ProbeReading {
            memory_mb: 10.0,
            ..Default::default()
        });
        assert_eq!(probe.sample().memory_mb, 10.0);
        probe.set(ProbeReading {
            memory_mb: 20.0,
            ..Default::default()
        });
        assert_eq!(probe.sample().memory_mb, 20.0);
    }
}
