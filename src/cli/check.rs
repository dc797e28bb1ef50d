use std::io::Read;
use std::path::Path;

use anyhow::Result;

use crate::sysfs::{parse_cpu_range, CPU_SYSFS_ROOT};

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = config.contains("CONFIG_HOTPLUG_CPU=y");
    if found {
        println!("  CONFIG_HOTPLUG_CPU    OK");
    } else {
        println!("  CONFIG_HOTPLUG_CPU    NOT FOUND -- cpu hotplug may not be available");
    }
    found
}

pub fn run_check() -> Result<()> {
    println!("CLUSTERPLUG PREFLIGHT CHECK");
    println!();

    let mut ok = true;

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    println!("SYSFS:");
    let root = Path::new(CPU_SYSFS_ROOT);
    let possible = std::fs::read_to_string(root.join("possible")).unwrap_or_default();
    let total = parse_cpu_range(&possible);
    if total > 0 {
        println!("  cpu/possible          OK ({} CPUS)", total);
    } else {
        println!("  cpu/possible          UNREADABLE");
        ok = false;
    }

    let online = std::fs::read_to_string(root.join("online")).unwrap_or_default();
    let online_count = parse_cpu_range(&online);
    if online_count > 0 {
        println!("  cpu/online            OK ({} ONLINE)", online_count);
    } else {
        println!("  cpu/online            UNREADABLE");
        ok = false;
    }

    // HOTPLUG NEEDS A WRITABLE online NODE FOR EVERY NON-BOOT CPU
    let mut writable = 0u32;
    for cpu in 1..total {
        let node = root.join(format!("cpu{}/online", cpu));
        let meta = match std::fs::metadata(&node) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !meta.permissions().readonly() {
            writable += 1;
        }
    }
    if total <= 1 {
        println!("  cpuN/online           NOTHING TO HOTPLUG (SINGLE CPU)");
        ok = false;
    } else if writable == total - 1 {
        println!("  cpuN/online           OK ({} HOTPLUGGABLE)", writable);
    } else {
        println!(
            "  cpuN/online           {}/{} WRITABLE -- RUN AS ROOT?",
            writable,
            total - 1
        );
        ok = false;
    }
    println!();

    println!("SUSPEND SIGNAL:");
    match std::fs::read_dir("/sys/class/backlight") {
        Ok(mut entries) => {
            if entries.next().is_some() {
                println!("  backlight             OK");
            } else {
                println!("  backlight             NO NODES (SUSPEND EDGE DISABLED)");
            }
        }
        Err(_) => println!("  backlight             NOT AVAILABLE (SUSPEND EDGE DISABLED)"),
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        std::process::exit(1);
    }

    Ok(())
}
