use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Host description attached to every consult event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub host_name: String,
    pub arch: String,
    pub cpu_count: usize,
    pub total_memory_mb: u64,
}

impl DeviceInfo {
    /// Blocking; refreshes CPU and memory tables once.
    pub fn collect() -> Self {
        let system = System::new_all();
        let unknown = || "unknown".to_string();

        Self {
            os_name: System::name().unwrap_or_else(unknown),
            os_version: System::os_version().unwrap_or_else(unknown),
            kernel_version: System::kernel_version().unwrap_or_else(unknown),
            host_name: System::host_name().unwrap_or_else(unknown),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: system.cpus().len(),
            total_memory_mb: system.total_memory() / 1024 / 1024,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {} (kernel {}) | {} | {} CPUs | {} MB",
            self.os_name,
            self.os_version,
            self.kernel_version,
            self.arch,
            self.cpu_count,
            self.total_memory_mb
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_reports_this_machine() {
        let info = DeviceInfo::collect();
        assert_eq!(info.arch, std::env::consts::ARCH);
        assert!(info.summary().contains(&info.arch));
    }
}
