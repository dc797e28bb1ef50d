// CLUSTERPLUG SYSFS/PROCFS COLLABORATORS
// THE LIVE IMPLEMENTATIONS OF THE ENGINE'S COLLABORATOR TRAITS:
//   CORE POWER    -> /sys/devices/system/cpu/cpuN/online
//   LOAD SOURCE   -> /proc/stat, OPTIONAL GPU UTILIZATION NODE
//   SUSPEND       -> /sys/class/backlight/*/bl_power (4 = FB_BLANK_POWERDOWN)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::engine::{CorePower, LoadSource, SuspendSignal};

pub const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";
const BACKLIGHT_ROOT: &str = "/sys/class/backlight";
const BL_POWER_OFF: u32 = 4;

// PARSE A KERNEL CPU RANGELIST ("0-3,5,7-9") INTO A COUNT.
pub fn parse_cpu_range(raw: &str) -> u32 {
    let mut count = 0u32;
    for range in raw.trim().split(',') {
        let parts: Vec<&str> = range.split('-').collect();
        match parts.len() {
            1 => {
                if parts[0].parse::<u32>().is_ok() {
                    count += 1;
                }
            }
            2 => {
                if let (Ok(lo), Ok(hi)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
                    count += hi.saturating_sub(lo) + 1;
                }
            }
            _ => {}
        }
    }
    count
}

fn read_cpu_range(path: &Path) -> u32 {
    parse_cpu_range(&fs::read_to_string(path).unwrap_or_default())
}

// --- CORE POWER ---

pub struct SysfsCorePower {
    root: PathBuf,
    total: u32,
    // /proc/stat (busy, total) JIFFIES PER CPU FROM THE PREVIOUS least_busy
    // QUERY, FOR DELTA-BASED BUSYNESS.
    prev_stat: HashMap<u32, (u64, u64)>,
}

impl SysfsCorePower {
    pub fn new() -> Result<Self> {
        Self::at(Path::new(CPU_SYSFS_ROOT))
    }

    pub fn at(root: &Path) -> Result<Self> {
        let possible = fs::read_to_string(root.join("possible"))
            .with_context(|| format!("READING {}/possible", root.display()))?;
        let total = parse_cpu_range(&possible);
        if total == 0 {
            anyhow::bail!("NO POSSIBLE CPUS REPORTED UNDER {}", root.display());
        }
        Ok(Self {
            root: root.to_path_buf(),
            total,
            prev_stat: HashMap::new(),
        })
    }

    fn online_node(&self, cpu: u32) -> PathBuf {
        self.root.join(format!("cpu{}/online", cpu))
    }

    // PER-CPU (BUSY, TOTAL) JIFFIES FROM /proc/stat.
    fn read_proc_stat(&self) -> HashMap<u32, (u64, u64)> {
        let mut out = HashMap::new();
        let raw = fs::read_to_string("/proc/stat").unwrap_or_default();
        for line in raw.lines() {
            if !line.starts_with("cpu") {
                continue;
            }
            let mut fields = line.split_whitespace();
            let tag = fields.next().unwrap_or("");
            let id: u32 = match tag.strip_prefix("cpu").and_then(|s| s.parse().ok()) {
                Some(id) => id,
                None => continue, // AGGREGATE "cpu " LINE
            };
            let vals: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
            if vals.len() < 5 {
                continue;
            }
            let total: u64 = vals.iter().sum();
            let idle = vals[3] + vals[4]; // idle + iowait
            out.insert(id, (total.saturating_sub(idle), total));
        }
        out
    }
}

impl CorePower for SysfsCorePower {
    fn total_count(&self) -> u32 {
        self.total
    }

    fn online_count(&mut self) -> u32 {
        read_cpu_range(&self.root.join("online")).max(1)
    }

    fn is_online(&mut self, cpu: u32) -> bool {
        if cpu == 0 {
            return true; // CPU 0 HAS NO online NODE AND IS ALWAYS UP
        }
        fs::read_to_string(self.online_node(cpu))
            .map(|s| s.trim() == "1")
            .unwrap_or(false)
    }

    fn bring_online(&mut self, cpu: u32) -> Result<()> {
        if cpu == 0 {
            return Ok(());
        }
        let node = self.online_node(cpu);
        fs::write(&node, "1").with_context(|| format!("WRITING 1 TO {}", node.display()))
    }

    fn take_offline(&mut self, cpu: u32) -> Result<()> {
        if cpu == 0 {
            anyhow::bail!("CPU 0 CANNOT BE OFFLINED");
        }
        let node = self.online_node(cpu);
        fs::write(&node, "0").with_context(|| format!("WRITING 0 TO {}", node.display()))
    }

    // ONLINE CORE WITH THE SMALLEST BUSY-JIFFIES DELTA SINCE THE LAST QUERY.
    // CPU 0 IS NEVER A CANDIDATE. FALLS BACK TO THE HIGHEST ONLINE ID WHEN
    // /proc/stat YIELDS NOTHING USABLE.
    fn least_busy_online_core(&mut self) -> u32 {
        let now = self.read_proc_stat();
        let mut best: Option<(u32, u64)> = None;

        for (&cpu, &(busy, _total)) in &now {
            if cpu == 0 {
                continue;
            }
            let delta = match self.prev_stat.get(&cpu) {
                Some(&(prev_busy, _)) => busy.saturating_sub(prev_busy),
                None => busy,
            };
            match best {
                Some((_, d)) if d <= delta => {}
                _ => best = Some((cpu, delta)),
            }
        }

        self.prev_stat = now;

        match best {
            Some((cpu, _)) => cpu,
            None => self.total.saturating_sub(1).max(1),
        }
    }
}

// --- LOAD SOURCE ---

pub struct ProcLoadSource {
    prev_busy: u64,
    prev_total: u64,
    gpu_node: Option<PathBuf>,
}

impl ProcLoadSource {
    pub fn new(gpu_node: Option<PathBuf>) -> Self {
        Self {
            prev_busy: 0,
            prev_total: 0,
            gpu_node,
        }
    }
}

impl LoadSource for ProcLoadSource {
    // CURRENTLY RUNNABLE TASKS: procs_running FROM /proc/stat, MINUS
    // OURSELVES (THE SAMPLER IS ALWAYS RUNNING WHILE IT SAMPLES).
    fn runnable_task_count(&mut self) -> u32 {
        let raw = fs::read_to_string("/proc/stat").unwrap_or_default();
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("procs_running ") {
                let n: u32 = rest.trim().parse().unwrap_or(1);
                return n.saturating_sub(1).max(1);
            }
        }
        1
    }

    // AGGREGATE BUSY PERCENTAGE SINCE THE PREVIOUS TICK, FROM THE "cpu "
    // SUMMARY LINE. FIRST SAMPLE REPORTS 0 (NO BASELINE YET).
    fn avg_cpu_load(&mut self) -> u32 {
        let raw = fs::read_to_string("/proc/stat").unwrap_or_default();
        let line = match raw.lines().next() {
            Some(l) if l.starts_with("cpu ") => l,
            _ => return 0,
        };
        let vals: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if vals.len() < 5 {
            return 0;
        }
        let total: u64 = vals.iter().sum();
        let idle = vals[3] + vals[4];
        let busy = total.saturating_sub(idle);

        let dt = total.saturating_sub(self.prev_total);
        let db = busy.saturating_sub(self.prev_busy);
        let had_baseline = self.prev_total > 0;
        self.prev_total = total;
        self.prev_busy = busy;

        if !had_baseline || dt == 0 {
            return 0;
        }
        ((db * 100 / dt) as u32).min(100)
    }

    // OPTIONAL GPU UTILIZATION NODE (LEADING INTEGER, E.G. MALI "NN").
    // NO NODE -> 0, SO THE BOOST PATH NEVER FIRES.
    fn avg_gpu_load(&mut self) -> u32 {
        let node = match &self.gpu_node {
            Some(p) => p,
            None => return 0,
        };
        let raw = fs::read_to_string(node).unwrap_or_default();
        let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().unwrap_or(0).min(100)
    }
}

// --- SUSPEND SIGNAL ---

pub struct BacklightSuspend {
    root: PathBuf,
}

impl BacklightSuspend {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from(BACKLIGHT_ROOT),
        }
    }

    pub fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl SuspendSignal for BacklightSuspend {
    // SUSPENDED WHEN EVERY BACKLIGHT IS POWERED DOWN. NO BACKLIGHT NODES
    // (HEADLESS BOX) -> NEVER SUSPENDED.
    fn is_suspended(&mut self) -> bool {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(_) => return false,
        };

        let mut saw_any = false;
        for entry in entries.flatten() {
            let node = entry.path().join("bl_power");
            if let Ok(raw) = fs::read_to_string(&node) {
                saw_any = true;
                if raw.trim().parse::<u32>().unwrap_or(0) != BL_POWER_OFF {
                    return false;
                }
            }
        }
        saw_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_range_single_and_spans() {
        assert_eq!(parse_cpu_range("0-7\n"), 8);
        assert_eq!(parse_cpu_range("0"), 1);
        assert_eq!(parse_cpu_range("0-3,5,7-9"), 8);
        assert_eq!(parse_cpu_range(""), 0);
        assert_eq!(parse_cpu_range("garbage"), 0);
    }
}
