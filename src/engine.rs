// CLUSTERPLUG HOTPLUG ENGINE
// OWNS ALL MUTABLE GOVERNOR STATE BEHIND ONE CONTROL LOCK.
// THE TICK PIPELINE (DECIDER -> SELECTOR -> CLAMP -> EXECUTOR), FORCED
// TRANSITIONS AND LOCK WRITES ALL SERIALIZE ON IT, SO AT MOST ONE
// TRANSITION IS EVER IN FLIGHT. THE USAGE LEDGER SITS BEHIND ITS OWN
// FINER LOCK SO time_in_state READS ONLY CONTEND ON THE BRIEF FLUSH.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};

use crate::event::{now_ns, Cause, TransitionLog};
use crate::ledger::UsageLedger;
use crate::policy::{
    self, Action, ClampContext, DeciderParams, Hstate, LevelTable, LoadSample, Streaks,
    NR_HSTATES, SUSPENDED_FLOOR, WAKE_BOOST_STATE,
};

// --- COLLABORATOR CONTRACTS ---

// PHYSICAL CORE POWER. SAFE TO CALL REPEATEDLY TOWARD A TARGET; REACHING A
// TARGET ALREADY MET IS A NO-OP.
pub trait CorePower: Send {
    fn total_count(&self) -> u32;
    fn online_count(&mut self) -> u32;
    fn is_online(&mut self, cpu: u32) -> bool;
    fn bring_online(&mut self, cpu: u32) -> Result<()>;
    fn take_offline(&mut self, cpu: u32) -> Result<()>;
    fn least_busy_online_core(&mut self) -> u32;
}

pub trait LoadSource: Send {
    fn runnable_task_count(&mut self) -> u32;
    fn avg_cpu_load(&mut self) -> u32;   // 0..100
    fn avg_gpu_load(&mut self) -> u32;   // 0..100, 0 WHEN NO GPU SOURCE
}

pub trait SuspendSignal: Send {
    fn is_suspended(&mut self) -> bool;
}

// --- TUNABLES / COUNTERS ---

#[derive(Clone, Copy, Debug)]
pub struct Tunables {
    pub up_threshold: u32,
    pub down_threshold: u32,
    pub up_tasks: u32,
    pub down_tasks: u32,
    pub cpu_high_watermark: u32,
    pub cpu_low_watermark: u32,
    pub gpu_boost_watermark: u32,
    pub awake_sampling_ms: u64,
    pub asleep_sampling_ms: u64,
    pub up_step: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            up_threshold: policy::DEFAULT_UP_THRESHOLD,
            down_threshold: policy::DEFAULT_DOWN_THRESHOLD,
            up_tasks: policy::DEFAULT_UP_TASKS,
            down_tasks: policy::DEFAULT_DOWN_TASKS,
            cpu_high_watermark: policy::CPU_HIGH_WATERMARK,
            cpu_low_watermark: policy::CPU_LOW_WATERMARK,
            gpu_boost_watermark: policy::GPU_BOOST_WATERMARK,
            awake_sampling_ms: policy::AWAKE_SAMPLING_MS,
            asleep_sampling_ms: policy::ASLEEP_SAMPLING_MS,
            up_step: policy::DEFAULT_UP_STEP,
        }
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct Counters {
    pub ticks: u64,
    pub transitions: u64,
    pub up_transitions: u64,
    pub down_transitions: u64,
    pub forced_transitions: u64,
    pub convergence_anomalies: u64,
}

// --- LOCK WRITE PLANNING ---

// WHICH INDEX BOUND A LOCK WRITE TARGETS. Ceiling IS THE EXTERNAL min_lock
// ATTRIBUTE (UPPER BOUND ON INDEX), Floor IS max_lock (LOWER BOUND).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LockWrite {
    Ceiling,
    Floor,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LockPlan {
    Rejected,            // A FORCE IS ACTIVE: ACKNOWLEDGED NO-OP
    Cleared,             // BOUND REMOVED, RE-ARM WITHOUT TRANSITION
    Stored,              // CURRENT LEVEL ALREADY SATISFIES THE BOUND
    Transition(Hstate),  // CALLER MUST CANCEL THE TICK AND COMMIT THIS LEVEL
}

// --- ENGINE ---

struct CtrlState {
    cur: Hstate,
    old: Hstate,   // LAST COMMITTED LEVEL; TIME ATTRIBUTION AND EQUALITY CHECKS
    sampling_rate_ms: u64,
    streaks: Streaks,
    tun: Tunables,
    ceiling_lock: Option<Hstate>,
    floor_lock: Option<Hstate>,
    forced: Option<Hstate>,
    counters: Counters,
    cores: Box<dyn CorePower>,
    loads: Box<dyn LoadSource>,
    suspend: Box<dyn SuspendSignal>,
    log: TransitionLog,
    verbose: bool,
}

pub struct Engine {
    table: LevelTable,
    ctrl: Mutex<CtrlState>,
    ledger: Mutex<UsageLedger>,
    // MIRROR OF THE COMMITTED LEVEL, UPDATED ONLY AT COMMIT. LETS
    // cur_hstate AND time_in_state READERS SKIP THE CONTROL LOCK.
    committed: AtomicU8,
}

impl Engine {
    pub fn new(
        table: LevelTable,
        cores: Box<dyn CorePower>,
        loads: Box<dyn LoadSource>,
        suspend: Box<dyn SuspendSignal>,
        tun: Tunables,
        verbose: bool,
    ) -> Self {
        let sampling_rate_ms = tun.awake_sampling_ms;
        Self {
            table,
            ctrl: Mutex::new(CtrlState {
                cur: Hstate::H0,
                old: Hstate::H0,
                sampling_rate_ms,
                streaks: Streaks::default(),
                tun,
                ceiling_lock: None,
                floor_lock: None,
                forced: None,
                counters: Counters::default(),
                cores,
                loads,
                suspend,
                log: TransitionLog::new(),
                verbose,
            }),
            ledger: Mutex::new(UsageLedger::new(now_ns())),
            committed: AtomicU8::new(Hstate::H0.index() as u8),
        }
    }

    pub fn level_table(&self) -> LevelTable {
        self.table
    }

    // --- TICK PIPELINE ---

    // ONE FULL PASS: SAMPLE -> DECIDE -> SELECT -> CLAMP -> EXECUTE.
    // RETURNS THE DELAY UNTIL THE NEXT TICK (THE CURRENT SAMPLING RATE,
    // WHICH THE SUSPEND/WAKE EDGES MAY HAVE JUST SWITCHED).
    pub fn tick(&self) -> std::time::Duration {
        let mut g = self.ctrl.lock().unwrap();
        g.counters.ticks += 1;

        // A FORCED LEVEL PINS THE GOVERNOR: NO DECIDER, NO EDGE TRANSITIONS.
        // THE TICK STILL TRACKS THE SUSPEND EDGE FOR CADENCE AND KEEPS THE
        // PHYSICAL CORE COUNT CONVERGED ON THE PINNED TARGET.
        if let Some(pinned) = g.forced {
            g.sampling_rate_ms = if g.suspend.is_suspended() {
                g.tun.asleep_sampling_ms
            } else {
                g.tun.awake_sampling_ms
            };
            let target_count = self.table.core_count(pinned);
            if g.cores.online_count() != target_count {
                let (_, anomalies) = converge(g.cores.as_mut(), target_count);
                g.counters.convergence_anomalies += anomalies;
            }
            return std::time::Duration::from_millis(g.sampling_rate_ms);
        }

        let online = g.cores.online_count();
        let runnable = g.loads.runnable_task_count();
        let cpu_load = g.loads.avg_cpu_load();
        let gpu_load = g.loads.avg_gpu_load();
        let boost = gpu_load >= g.tun.gpu_boost_watermark;

        let params = DeciderParams {
            up_threshold: g.tun.up_threshold,
            down_threshold: g.tun.down_threshold,
            up_tasks: g.tun.up_tasks,
            down_tasks: g.tun.down_tasks,
            cpu_high_watermark: g.tun.cpu_high_watermark,
            cpu_low_watermark: g.tun.cpu_low_watermark,
        };
        let sample = LoadSample { online, runnable, cpu_load, boost };
        let action = policy::observe(&mut g.streaks, &params, &sample);
        let target = policy::adjust_level(g.old, action, g.tun.up_step);

        let suspended = g.suspend.is_suspended();
        if suspended && g.sampling_rate_ms == g.tun.awake_sampling_ms {
            // SUSPEND EDGE: PARK AT THE SUSPENDED FLOOR, SLOW THE CADENCE.
            self.enter_hstate(&mut g, false, SUSPENDED_FLOOR, Cause::Suspend, suspended);
            g.sampling_rate_ms = g.tun.asleep_sampling_ms;
        } else if !suspended && g.sampling_rate_ms == g.tun.asleep_sampling_ms {
            // WAKE EDGE: BOOST STRAIGHT TO FULL CORES, BYPASSING HYSTERESIS.
            self.enter_hstate(&mut g, true, WAKE_BOOST_STATE, Cause::Wake, suspended);
            g.sampling_rate_ms = g.tun.awake_sampling_ms;
        } else if self.table.core_count(g.old) != online || action != Action::Stay {
            self.enter_hstate(&mut g, false, target, Cause::Auto, suspended);
        }

        if g.verbose {
            println!(
                "tick: {:<8} online: {} runnable: {:<4} load: {:>3}% gpu: {:>3}% streaks: U={} D={} level: {}",
                g.counters.ticks, online, runnable, cpu_load, gpu_load,
                g.streaks.up, g.streaks.down, g.old.name(),
            );
        }

        std::time::Duration::from_millis(g.sampling_rate_ms)
    }

    // --- TRANSITION EXECUTOR ---

    // CLAMP, THEN COMMIT A LEVEL CHANGE. EQUAL-LEVEL RESULTS ARE A FULL
    // NO-OP: NO CORE-POWER CALLS, NO LEDGER DOUBLE-COUNTING.
    // `suspended` IS THE CALLER'S SINGLE PER-OPERATION OBSERVATION OF THE
    // SUSPEND SIGNAL; THE EXECUTOR NEVER RE-READS IT MID-TRANSITION.
    fn enter_hstate(
        &self,
        g: &mut CtrlState,
        force: bool,
        target: Hstate,
        cause: Cause,
        suspended: bool,
    ) {
        let ctx = ClampContext {
            ceiling_lock: g.ceiling_lock,
            floor_lock: g.floor_lock,
            suspended,
        };
        let state = policy::clamp_level(target, force, &ctx);

        if state == g.old {
            return;
        }
        let from = g.old;

        // FIRST FLUSH CLOSES THE OUTGOING LEVEL'S INTERVAL.
        self.ledger.lock().unwrap().flush(from, now_ns());

        let target_count = self.table.core_count(state);
        let (online, anomalies) = converge(g.cores.as_mut(), target_count);
        g.counters.convergence_anomalies += anomalies;

        // A TRANSITION INVALIDATES PRIOR HYSTERESIS EVIDENCE.
        g.streaks.reset();

        // SECOND FLUSH CHARGES THE TRANSITION ITSELF TO THE OUTGOING LEVEL
        // AND RESETS THE MARK, SO ACCOUNTING FOR THE NEW LEVEL STARTS CLEAN.
        self.ledger.lock().unwrap().flush(from, now_ns());

        g.old = state;
        g.cur = state;
        self.committed.store(state.index() as u8, Ordering::Relaxed);

        g.counters.transitions += 1;
        if state > from {
            g.counters.down_transitions += 1;
        } else {
            g.counters.up_transitions += 1;
        }
        if force {
            g.counters.forced_transitions += 1;
        }

        let ts = now_ns();
        g.log.record(ts, from, state, online, cause);
        println!(
            "TRANSITION {} -> {} ({} CORES ONLINE, TARGET {}) [{}]",
            from.name(), state.name(), online, target_count, cause.label(),
        );
    }

    // --- CONTROL SURFACE: PLAIN TUNABLES ---

    pub fn tunables(&self) -> Tunables {
        self.ctrl.lock().unwrap().tun
    }

    pub fn update_tunables(&self, apply: impl FnOnce(&mut Tunables)) {
        let mut g = self.ctrl.lock().unwrap();
        apply(&mut g.tun);
    }

    pub fn sampling_rate_ms(&self) -> u64 {
        self.ctrl.lock().unwrap().sampling_rate_ms
    }

    // PLAIN VALUE SWAP. TAKES EFFECT ON THE NEXT TICK; THE SUSPEND/WAKE
    // EDGES KEEP SWITCHING BETWEEN THE AWAKE/ASLEEP PAIR FROM HERE ON.
    pub fn set_sampling_rate_ms(&self, ms: u64) {
        let mut g = self.ctrl.lock().unwrap();
        g.sampling_rate_ms = ms;
        g.tun.awake_sampling_ms = ms;
    }

    // --- CONTROL SURFACE: READS ---

    pub fn current_level(&self) -> Hstate {
        Hstate::from_index(self.committed.load(Ordering::Relaxed) as usize)
    }

    pub fn forced_level(&self) -> Option<Hstate> {
        self.ctrl.lock().unwrap().forced
    }

    pub fn ceiling_lock(&self) -> Option<Hstate> {
        self.ctrl.lock().unwrap().ceiling_lock
    }

    pub fn floor_lock(&self) -> Option<Hstate> {
        self.ctrl.lock().unwrap().floor_lock
    }

    pub fn counters(&self) -> Counters {
        self.ctrl.lock().unwrap().counters
    }

    // --- CONTROL SURFACE: FORCED LEVEL ---

    // CALLER MUST HAVE CANCELLED THE PENDING TICK FIRST (TickTimer::cancel_and_wait).
    pub fn force_to(&self, target: Hstate) {
        let mut g = self.ctrl.lock().unwrap();
        let suspended = g.suspend.is_suspended();
        self.enter_hstate(&mut g, true, target, Cause::Forced, suspended);
        g.forced = Some(target);
    }

    pub fn clear_force(&self) {
        self.ctrl.lock().unwrap().forced = None;
    }

    // --- CONTROL SURFACE: LOCKS ---

    // DECIDE WHAT A min_lock/max_lock WRITE REQUIRES. STORES OR CLEARS THE
    // BOUND INLINE WHEN NO TRANSITION IS NEEDED; RETURNS Transition WHEN THE
    // COMMITTED LEVEL VIOLATES THE NEW BOUND AND THE CALLER MUST RUN THE
    // CANCEL-AND-COMMIT DANCE.
    pub fn plan_lock_write(&self, which: LockWrite, value: i64) -> Result<LockPlan> {
        if value >= NR_HSTATES as i64 {
            bail!("INVALID LEVEL INDEX {}", value);
        }

        let mut g = self.ctrl.lock().unwrap();

        if g.forced.is_some() {
            return Ok(LockPlan::Rejected);
        }

        if value < 0 {
            match which {
                LockWrite::Ceiling => g.ceiling_lock = None,
                LockWrite::Floor => g.floor_lock = None,
            }
            return Ok(LockPlan::Cleared);
        }
        // value IS 0..NR_HSTATES HERE
        let requested = Hstate::from_index(value as usize);

        match which {
            LockWrite::Floor => {
                // AN EXISTING CEILING DEEPER THAN THE REQUEST WINS;
                // OTHERWISE THE REQUEST STANDS.
                let mut state = requested;
                if let Some(ceiling) = g.ceiling_lock {
                    if ceiling > requested {
                        state = ceiling;
                    }
                }
                if g.old > state {
                    // ALREADY DEEPER THAN THE FLOOR: JUST STORE THE BOUND.
                    g.floor_lock = Some(state);
                    Ok(LockPlan::Stored)
                } else {
                    Ok(LockPlan::Transition(state))
                }
            }
            LockWrite::Ceiling => {
                let mut state = requested;
                if let Some(floor) = g.floor_lock {
                    if state < floor {
                        state = floor;
                    }
                }
                if g.old < state {
                    // ALREADY SHALLOWER THAN THE CEILING: JUST STORE IT.
                    g.ceiling_lock = Some(state);
                    Ok(LockPlan::Stored)
                } else {
                    Ok(LockPlan::Transition(state))
                }
            }
        }
    }

    // COMMIT THE TRANSITION HALF OF A LOCK WRITE. CALLER CANCELLED THE TICK.
    pub fn commit_lock_transition(&self, which: LockWrite, level: Hstate) {
        let mut g = self.ctrl.lock().unwrap();
        let suspended = g.suspend.is_suspended();
        self.enter_hstate(&mut g, true, level, Cause::Lock, suspended);
        match which {
            LockWrite::Ceiling => g.ceiling_lock = Some(level),
            LockWrite::Floor => g.floor_lock = Some(level),
        }
    }

    // --- TIME-IN-STATE REPORT ---

    // FLUSH ELAPSED TIME TO THE COMMITTED LEVEL, THEN SNAPSHOT. ONLY THE
    // LEDGER LOCK IS TAKEN, SO A RUNNING TICK NEVER BLOCKS THIS READ FOR
    // LONGER THAN ITS OWN FLUSHES.
    pub fn time_in_state_ms(&self) -> [u64; NR_HSTATES] {
        let level = self.current_level();
        let mut ledger = self.ledger.lock().unwrap();
        ledger.flush(level, now_ns());
        ledger.snapshot_ms()
    }

    // --- LIFECYCLE HOOKS ---

    // THE ORIGINAL PLATFORM EXPOSED DISABLE/ENABLE ENTRY POINTS THAT WERE
    // DELIBERATE NO-OPS. PRESERVED AS HOOKS WITH NO BEHAVIOR.
    pub fn disable(&self) {}
    pub fn enable(&self) {}

    // --- EXIT REPORTING ---

    pub fn dump_log(&self) {
        self.ctrl.lock().unwrap().log.dump();
    }

    pub fn summarize(&self) {
        let g = self.ctrl.lock().unwrap();
        g.log.summary();
        let c = g.counters;
        println!(
            "[COUNTERS] ticks={} transitions={} up={} down={} forced={} anomalies={}",
            c.ticks, c.transitions, c.up_transitions, c.down_transitions,
            c.forced_transitions, c.convergence_anomalies,
        );
    }
}

// DRIVE THE ONLINE CORE COUNT TOWARD `target`. BOUNDED BY THE TOTAL CORE
// COUNT SO A STALE ONLINE VIEW OR A FAILING CORE CAN NEVER SPIN FOREVER.
// FAILURES ARE ABSORBED AS ANOMALIES; THE LOGICAL LEVEL COMMITS REGARDLESS.
fn converge(cores: &mut dyn CorePower, target: u32) -> (u32, u64) {
    let total = cores.total_count();
    let mut anomalies = 0u64;

    for cpu in 0..total {
        let online = cores.online_count();
        if online == target {
            break;
        }

        if target > online {
            if !cores.is_online(cpu) {
                if let Err(e) = cores.bring_online(cpu) {
                    anomalies += 1;
                    eprintln!("WARN: CPU {} ONLINE FAILED: {:#}", cpu, e);
                }
            }
        } else {
            let victim = cores.least_busy_online_core();
            if let Err(e) = cores.take_offline(victim) {
                anomalies += 1;
                eprintln!("WARN: CPU {} OFFLINE FAILED: {:#}", victim, e);
            }
        }
    }

    (cores.online_count(), anomalies)
}
