// CLUSTERPLUG v1.2.0 -- HYSTERESIS CPU HOTPLUG GOVERNOR
// POWERS PROCESSOR CORES ON AND OFF TO TRACK RECENT LOAD
//
// POLICY DECISIONS HAPPEN IN THE ENGINE (ONE CONTROL LOCK, NO OVERLAP)
// THE BINARY HANDLES: CONFIGURATION, THE CONTROL SOCKET, REPORTING

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use clusterplug::cli::check::run_check;
use clusterplug::engine::{CorePower, Engine, Tunables};
use clusterplug::policy::{self, Hstate, LevelTable};
use clusterplug::surface;
use clusterplug::sysfs::{BacklightSuspend, ProcLoadSource, SysfsCorePower};
use clusterplug::timer::TickTimer;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "clusterplug")]
#[command(about = "CLUSTERPLUG -- HYSTERESIS CPU HOTPLUG GOVERNOR")]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,

    // CONTROL SOCKET PATH (DAEMON AND CLIENT SIDES)
    #[arg(long, default_value = surface::DEFAULT_SOCKET)]
    socket: PathBuf,

    // AWAKE TICK CADENCE IN MILLISECONDS
    #[arg(long, default_value_t = policy::AWAKE_SAMPLING_MS)]
    sampling_ms: u64,

    // SUSPENDED TICK CADENCE IN MILLISECONDS
    #[arg(long, default_value_t = policy::ASLEEP_SAMPLING_MS)]
    asleep_sampling_ms: u64,

    // CONSECUTIVE QUALIFYING TICKS (EXCLUSIVE) BEFORE ADDING CORES
    #[arg(long, default_value_t = policy::DEFAULT_UP_THRESHOLD)]
    up_threshold: u32,

    // CONSECUTIVE QUALIFYING TICKS (EXCLUSIVE) BEFORE SHEDDING A CORE
    #[arg(long, default_value_t = policy::DEFAULT_DOWN_THRESHOLD)]
    down_threshold: u32,

    // RUNNABLE-TASK MULTIPLIER GATING AN INCREASE
    #[arg(long, default_value_t = policy::DEFAULT_UP_TASKS)]
    up_tasks: u32,

    // RUNNABLE-TASK MULTIPLIER GATING A DECREASE
    #[arg(long, default_value_t = policy::DEFAULT_DOWN_TASKS)]
    down_tasks: u32,

    // CPU LOAD WATERMARKS, PERCENT
    #[arg(long, default_value_t = policy::CPU_HIGH_WATERMARK)]
    cpu_high: u32,

    #[arg(long, default_value_t = policy::CPU_LOW_WATERMARK)]
    cpu_low: u32,

    // GPU LOAD AT OR ABOVE THIS FORCES A CORE-COUNT BOOST
    #[arg(long, default_value_t = policy::GPU_BOOST_WATERMARK)]
    gpu_watermark: u32,

    // LEVELS JUMPED TOWARD FULL CORES ON AN INCREASE
    #[arg(long, default_value_t = policy::DEFAULT_UP_STEP)]
    up_step: usize,

    // SYSFS NODE REPORTING GPU UTILIZATION (ABSENT: BOOST NEVER FIRES)
    #[arg(long)]
    gpu_load_node: Option<PathBuf>,

    // PRINT A TELEMETRY LINE EVERY TICK
    #[arg(long)]
    verbose: bool,

    // DUMP THE FULL TRANSITION LOG ON EXIT
    #[arg(long)]
    dump_log: bool,
}

#[derive(Subcommand)]
enum Cmd {
    // VERIFY KERNEL AND SYSFS SUPPORT BEFORE RUNNING THE DAEMON
    Check,
    // READ ONE ATTRIBUTE FROM THE RUNNING DAEMON
    Get { attr: String },
    // WRITE ONE ATTRIBUTE ON THE RUNNING DAEMON
    Set { attr: String, value: String },
    // PER-LEVEL CUMULATIVE TIME REPORT FROM THE RUNNING DAEMON
    TimeInState,
    // PRINT THE LEVEL -> CORE COUNT LADDER FOR THIS MACHINE
    Levels,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Cmd::Check) => return run_check(),
        Some(Cmd::Get { attr }) => {
            let reply = surface::request(&cli.socket, &format!("get {}", attr))?;
            print!("{}", reply);
            if reply.starts_with("ERR") {
                std::process::exit(1);
            }
            return Ok(());
        }
        Some(Cmd::Set { attr, value }) => {
            let reply = surface::request(&cli.socket, &format!("set {} {}", attr, value))?;
            print!("{}", reply);
            if reply.starts_with("ERR") {
                std::process::exit(1);
            }
            return Ok(());
        }
        Some(Cmd::TimeInState) => {
            print!("{}", surface::request(&cli.socket, "time_in_state")?);
            return Ok(());
        }
        Some(Cmd::Levels) => {
            let cores = SysfsCorePower::new()?;
            let table = LevelTable::for_cores(cores.total_count());
            for state in Hstate::all() {
                println!("{} {}", state.name(), table.core_count(state));
            }
            return Ok(());
        }
        None => {}
    }

    run_daemon(cli)
}

fn run_daemon(cli: Cli) -> Result<()> {
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let mut cores = SysfsCorePower::new()?;
    let total = cores.total_count();
    let online = cores.online_count();
    let table = LevelTable::for_cores(total);

    let tun = Tunables {
        up_threshold: cli.up_threshold,
        down_threshold: cli.down_threshold,
        up_tasks: cli.up_tasks,
        down_tasks: cli.down_tasks,
        cpu_high_watermark: cli.cpu_high,
        cpu_low_watermark: cli.cpu_low,
        gpu_boost_watermark: cli.gpu_watermark,
        awake_sampling_ms: cli.sampling_ms,
        asleep_sampling_ms: cli.asleep_sampling_ms,
        up_step: cli.up_step,
    };

    println!("CLUSTERPLUG v1.2.0");
    println!("CPUS:            {} ({} ONLINE)", total, online);
    println!("SAMPLING:        {} ms AWAKE / {} ms ASLEEP", tun.awake_sampling_ms, tun.asleep_sampling_ms);
    println!("THRESHOLDS:      UP={} DOWN={} (STREAK TICKS, EXCLUSIVE)", tun.up_threshold, tun.down_threshold);
    println!("WATERMARKS:      CPU {}..{}% GPU {}%", tun.cpu_low_watermark, tun.cpu_high_watermark, tun.gpu_boost_watermark);
    println!("UP STEP:         {} LEVELS", tun.up_step);
    println!("GPU NODE:        {}", cli.gpu_load_node.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "none".into()));
    println!("SOCKET:          {}", cli.socket.display());
    println!();

    let engine = Arc::new(Engine::new(
        table,
        Box::new(cores),
        Box::new(ProcLoadSource::new(cli.gpu_load_node.clone())),
        Box::new(BacklightSuspend::new()),
        tun,
        cli.verbose,
    ));

    // STARTUP IS FATAL WITHOUT A CONTROL SOCKET OR A TICK THREAD; THE
    // ENGINE NEVER STARTS TICKING HALF-WIRED.
    let listener = surface::bind(&cli.socket)?;

    let timer = Arc::new(TickTimer::new());
    let tick_timer = Arc::clone(&timer);
    let tick_engine = Arc::clone(&engine);
    let tick_thread = std::thread::Builder::new()
        .name("clusterplug-tick".into())
        .spawn(move || tick_timer.run(|| tick_engine.tick()))?;

    timer.arm(Duration::from_millis(tun.awake_sampling_ms));

    println!("CLUSTERPLUG IS ACTIVE (CTRL+C TO EXIT)");

    surface::serve(&listener, &engine, &timer, &SHUTDOWN);

    println!("CLUSTERPLUG IS SHUTTING DOWN");

    timer.shutdown();
    let _ = tick_thread.join();

    println!("\nTIME IN STATE:");
    let ms = engine.time_in_state_ms();
    for (state, ms) in Hstate::all().iter().zip(ms.iter()) {
        println!("  {} {}", state.name(), ms);
    }

    if cli.dump_log {
        engine.dump_log();
    }
    engine.summarize();

    let _ = std::fs::remove_file(&cli.socket);
    println!("CLUSTERPLUG OUT.");
    Ok(())
}
