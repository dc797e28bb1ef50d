// CLUSTERPLUG v1.2.0 POLICY TESTS
// LEVEL LADDER, HYSTERESIS DECIDER, STEP SELECTOR, BOUNDS CLAMP
//
// ALL TESTS USE PURE-RUST TYPES FROM clusterplug::policy.
// ZERO SYSFS DEPENDENCIES. RUN OFFLINE.

use clusterplug::policy::{
    adjust_level, clamp_level, observe, Action, ClampContext, DeciderParams, Hstate, LevelTable,
    LoadSample, Streaks, CPU_HIGH_WATERMARK, CPU_LOW_WATERMARK, DEFAULT_DOWN_TASKS,
    DEFAULT_DOWN_THRESHOLD, DEFAULT_UP_STEP, DEFAULT_UP_TASKS, DEFAULT_UP_THRESHOLD, NR_HSTATES,
    SCREEN_ON_CEILING, STREAK_CLAMP, SUSPENDED_FLOOR,
};

fn params() -> DeciderParams {
    DeciderParams {
        up_threshold: DEFAULT_UP_THRESHOLD,
        down_threshold: DEFAULT_DOWN_THRESHOLD,
        up_tasks: DEFAULT_UP_TASKS,
        down_tasks: DEFAULT_DOWN_TASKS,
        cpu_high_watermark: CPU_HIGH_WATERMARK,
        cpu_low_watermark: CPU_LOW_WATERMARK,
    }
}

fn quiet_sample(online: u32) -> LoadSample {
    // FEW RUNNABLE TASKS, LOW LOAD: QUALIFIES THE DOWN STREAK
    LoadSample { online, runnable: 1, cpu_load: CPU_LOW_WATERMARK - 5, boost: false }
}

fn busy_sample(online: u32) -> LoadSample {
    // TASK PRESSURE AND HIGH LOAD: QUALIFIES THE UP STREAK
    LoadSample {
        online,
        runnable: online * DEFAULT_UP_TASKS + 1,
        cpu_load: CPU_HIGH_WATERMARK + 10,
        boost: false,
    }
}

// === HYSTERESIS DECIDER ===

#[test]
fn down_streak_needs_strictly_more_than_threshold() {
    let mut streaks = Streaks::default();
    let p = params();
    let s = quiet_sample(8);

    // FIRST down_threshold TICKS: STREAK CLIMBS BUT DOES NOT FIRE
    for _ in 0..DEFAULT_DOWN_THRESHOLD {
        assert_eq!(observe(&mut streaks, &p, &s), Action::Stay);
    }
    assert_eq!(streaks.down, DEFAULT_DOWN_THRESHOLD);

    // TICK down_threshold + 1: STREAK EXCEEDS THE THRESHOLD -> Down
    assert_eq!(observe(&mut streaks, &p, &s), Action::Down);
    assert_eq!(streaks.down, DEFAULT_DOWN_THRESHOLD + 1);
}

#[test]
fn up_streak_needs_strictly_more_than_threshold() {
    let mut streaks = Streaks::default();
    let p = params();
    let s = busy_sample(4);

    for _ in 0..DEFAULT_UP_THRESHOLD {
        assert_eq!(observe(&mut streaks, &p, &s), Action::Stay);
    }
    assert_eq!(observe(&mut streaks, &p, &s), Action::Up);
}

#[test]
fn quiet_tasks_but_middling_load_resets_both_streaks() {
    // TASK-QUIET BUT LOAD BETWEEN THE WATERMARKS: THE RESET-AND-STAY BRANCH
    let mut streaks = Streaks { up: 2, down: 2 };
    let p = params();
    let s = LoadSample { online: 8, runnable: 1, cpu_load: CPU_LOW_WATERMARK + 10, boost: false };

    assert_eq!(observe(&mut streaks, &p, &s), Action::Stay);
    assert_eq!(streaks.up, 0);
    assert_eq!(streaks.down, 0);
}

#[test]
fn coast_state_leaves_streaks_untouched() {
    // TASK PRESSURE WITHOUT HIGH LOAD: NEITHER BRANCH QUALIFIES.
    // STREAKS KEEP THEIR VALUES, DISTINCT FROM THE RESET BRANCH.
    let mut streaks = Streaks { up: 2, down: 1 };
    let p = params();
    let s = LoadSample {
        online: 4,
        runnable: 4 * DEFAULT_UP_TASKS + 1,
        cpu_load: CPU_HIGH_WATERMARK - 5,
        boost: false,
    };

    assert_eq!(observe(&mut streaks, &p, &s), Action::Stay);
    assert_eq!(streaks.up, 2);
    assert_eq!(streaks.down, 1);
}

#[test]
fn interruption_resets_the_opposing_streak() {
    let mut streaks = Streaks::default();
    let p = params();

    for _ in 0..DEFAULT_DOWN_THRESHOLD {
        observe(&mut streaks, &p, &quiet_sample(8));
    }
    assert_eq!(streaks.down, DEFAULT_DOWN_THRESHOLD);

    // ONE BUSY TICK WIPES THE ACCUMULATED DOWN EVIDENCE
    observe(&mut streaks, &p, &busy_sample(8));
    assert_eq!(streaks.down, 0);
    assert_eq!(streaks.up, 1);
}

#[test]
fn boost_fires_on_the_tick_it_appears() {
    // DEEP STANDING DOWN STREAK, THEN A BOOSTED SAMPLE: IMMEDIATE Up
    let mut streaks = Streaks { up: 0, down: 100 };
    let p = params();
    let s = LoadSample { online: 2, runnable: 1, cpu_load: 5, boost: true };

    assert_eq!(observe(&mut streaks, &p, &s), Action::Up);
    assert_eq!(streaks.down, 0);
    assert_eq!(streaks.up, 1);
}

#[test]
fn boost_overrides_task_quiet_conditions() {
    // ONLINE * DOWN_TASKS >= RUNNABLE WOULD FEED THE DOWN STREAK, BUT
    // BOOST DISQUALIFIES THE DECREASE BRANCH OUTRIGHT
    let mut streaks = Streaks::default();
    let p = params();
    let s = LoadSample { online: 8, runnable: 1, cpu_load: 10, boost: true };

    assert_eq!(observe(&mut streaks, &p, &s), Action::Up);
    assert_eq!(streaks.down, 0);
}

#[test]
fn streaks_saturate_at_the_clamp() {
    let mut streaks = Streaks { up: 0, down: STREAK_CLAMP };
    let p = params();

    observe(&mut streaks, &p, &quiet_sample(8));
    assert_eq!(streaks.down, STREAK_CLAMP);
}

// === STEP SELECTOR ===

#[test]
fn down_sheds_one_level() {
    assert_eq!(adjust_level(Hstate::H2, Action::Down, DEFAULT_UP_STEP), Hstate::H3);
}

#[test]
fn down_saturates_at_the_deepest_level() {
    assert_eq!(adjust_level(Hstate::H7, Action::Down, DEFAULT_UP_STEP), Hstate::H7);
}

#[test]
fn up_jumps_four_levels() {
    assert_eq!(adjust_level(Hstate::H6, Action::Up, DEFAULT_UP_STEP), Hstate::H2);
}

#[test]
fn up_saturates_at_full_cores() {
    assert_eq!(adjust_level(Hstate::H2, Action::Up, DEFAULT_UP_STEP), Hstate::H0);
    assert_eq!(adjust_level(Hstate::H0, Action::Up, DEFAULT_UP_STEP), Hstate::H0);
}

#[test]
fn stay_keeps_the_previous_level() {
    assert_eq!(adjust_level(Hstate::H4, Action::Stay, DEFAULT_UP_STEP), Hstate::H4);
}

// === BOUNDS CLAMP ===

fn ctx(ceiling: Option<Hstate>, floor: Option<Hstate>, suspended: bool) -> ClampContext {
    ClampContext { ceiling_lock: ceiling, floor_lock: floor, suspended }
}

#[test]
fn ceiling_lock_caps_the_index() {
    let c = ctx(Some(Hstate::H2), None, false);
    assert_eq!(clamp_level(Hstate::H5, false, &c), Hstate::H2);
    assert_eq!(clamp_level(Hstate::H1, false, &c), Hstate::H1);
}

#[test]
fn floor_lock_raises_the_index() {
    let c = ctx(None, Some(Hstate::H3), false);
    assert_eq!(clamp_level(Hstate::H0, false, &c), Hstate::H3);
    assert_eq!(clamp_level(Hstate::H5, false, &c), Hstate::H5);
}

#[test]
fn awake_candidates_never_pass_the_screen_on_ceiling() {
    let c = ctx(None, None, false);
    assert_eq!(clamp_level(Hstate::H7, false, &c), SCREEN_ON_CEILING);
}

#[test]
fn suspended_candidates_never_fall_below_the_floor() {
    let c = ctx(None, None, true);
    assert_eq!(clamp_level(Hstate::H0, false, &c), SUSPENDED_FLOOR);
    // DEEPER THAN THE FLOOR IS STILL ALLOWED WHILE SUSPENDED
    assert_eq!(clamp_level(Hstate::H7, false, &c), Hstate::H7);
}

#[test]
fn force_bypasses_locks_and_the_suspend_window() {
    let c = ctx(Some(Hstate::H1), Some(Hstate::H5), false);
    assert_eq!(clamp_level(Hstate::H7, true, &c), Hstate::H7);
    let asleep = ctx(None, None, true);
    assert_eq!(clamp_level(Hstate::H0, true, &asleep), Hstate::H0);
}

// === LEVEL LADDER ===

#[test]
fn ladder_sheds_one_core_per_level() {
    let table = LevelTable::for_cores(8);
    assert_eq!(table.core_count(Hstate::H0), 8);
    assert_eq!(table.core_count(Hstate::H3), 5);
    assert_eq!(table.core_count(Hstate::H7), 1);
}

#[test]
fn ladder_floors_at_one_core() {
    // 4-CPU MACHINE: DEEP LEVELS ALL COLLAPSE TO A SINGLE CORE
    let table = LevelTable::for_cores(4);
    assert_eq!(table.core_count(Hstate::H3), 1);
    assert_eq!(table.core_count(Hstate::H7), 1);
}

#[test]
fn ladder_is_monotonically_non_increasing() {
    let table = LevelTable::for_cores(8);
    let all = Hstate::all();
    for pair in all.windows(2) {
        assert!(table.core_count(pair[0]) >= table.core_count(pair[1]));
    }
}

#[test]
fn out_of_range_index_resolves_to_full_cores() {
    let table = LevelTable::for_cores(8);
    assert_eq!(table.core_count_for_index(NR_HSTATES + 10), 8);
    assert_eq!(Hstate::from_index(99), Hstate::H0);
}

#[test]
fn checked_index_rejects_out_of_range() {
    assert_eq!(Hstate::checked(7), Some(Hstate::H7));
    assert_eq!(Hstate::checked(8), None);
    assert_eq!(Hstate::checked(-1), None);
}
