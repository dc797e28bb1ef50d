// CLUSTERPLUG POLICY
// PURE-RUST MODULE: ZERO I/O DEPENDENCIES
// SHARED BETWEEN THE DAEMON (engine.rs) AND THE OFFLINE TESTS (tests/)
//
// THE LEVEL LADDER, THE HYSTERESIS DECIDER, THE STEP SELECTOR AND THE
// BOUNDS CLAMP ALL LIVE HERE AS PURE FUNCTIONS OVER PLAIN STATE.

// --- REFERENCE POLICY CONSTANTS ---

pub const AWAKE_SAMPLING_MS: u64  = 100;    // ACTIVE TICK CADENCE
pub const ASLEEP_SAMPLING_MS: u64 = 1000;   // SLOW CADENCE WHILE SUSPENDED

pub const DEFAULT_UP_THRESHOLD: u32   = 3;
pub const DEFAULT_DOWN_THRESHOLD: u32 = 3;
pub const DEFAULT_UP_TASKS: u32       = 2;  // ONLINE * UP_TASKS <= RUNNABLE GATES AN INCREASE
pub const DEFAULT_DOWN_TASKS: u32     = 1;  // ONLINE * DOWN_TASKS >= RUNNABLE GATES A DECREASE

pub const CPU_HIGH_WATERMARK: u32 = 60;     // AVG LOAD >= THIS FEEDS THE UP STREAK
pub const CPU_LOW_WATERMARK: u32  = 25;     // AVG LOAD <= THIS FEEDS THE DOWN STREAK
pub const GPU_BOOST_WATERMARK: u32 = 80;    // GPU LOAD >= THIS FORCES AN INCREASE

// CORE REMOVAL IS GRADUAL (ONE LEVEL PER TRANSITION), RESTORATION IS ABRUPT.
// THE STEP MAGNITUDE IS A TUNED CONSTANT, KEPT AS A PARAMETER.
pub const DEFAULT_UP_STEP: usize = 4;

// STREAK COUNTERS NEVER GROW PAST THIS. THRESHOLDS ARE SINGLE DIGITS IN
// PRACTICE, SO THE CLAMP ONLY GUARDS AGAINST OVERFLOW ON PATHOLOGICAL RUNS.
pub const STREAK_CLAMP: u32 = 1_000_000;

// --- LEVEL LADDER ---

pub const NR_HSTATES: usize = 8;

// ONE DISCRETE POINT IN THE CORE-COUNT LADDER. HIGHER INDEX = FEWER CORES.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Hstate {
    H0 = 0,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    H7,
}

pub const SCREEN_ON_CEILING: Hstate = Hstate::H6;  // DEEPEST LEVEL WHILE AWAKE
pub const SUSPENDED_FLOOR: Hstate = Hstate::H6;    // SHALLOWEST LEVEL WHILE SUSPENDED
pub const WAKE_BOOST_STATE: Hstate = Hstate::H0;   // FORCED ON THE WAKE EDGE

impl Hstate {
    // OUT-OF-RANGE INDICES RESOLVE TO H0 (FULL CORE COUNT). NEVER A RAW
    // ARRAY INDEX WITHOUT THIS MAPPING.
    pub fn from_index(idx: usize) -> Self {
        Self::checked(idx as i64).unwrap_or(Hstate::H0)
    }

    // STRICT VARIANT FOR CONTROL-SURFACE INPUT: REJECTS INSTEAD OF FALLING BACK.
    pub fn checked(idx: i64) -> Option<Self> {
        match idx {
            0 => Some(Hstate::H0),
            1 => Some(Hstate::H1),
            2 => Some(Hstate::H2),
            3 => Some(Hstate::H3),
            4 => Some(Hstate::H4),
            5 => Some(Hstate::H5),
            6 => Some(Hstate::H6),
            7 => Some(Hstate::H7),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn last() -> Self {
        Hstate::H7
    }

    pub fn name(self) -> &'static str {
        match self {
            Hstate::H0 => "H0",
            Hstate::H1 => "H1",
            Hstate::H2 => "H2",
            Hstate::H3 => "H3",
            Hstate::H4 => "H4",
            Hstate::H5 => "H5",
            Hstate::H6 => "H6",
            Hstate::H7 => "H7",
        }
    }

    pub fn all() -> [Hstate; NR_HSTATES] {
        [
            Hstate::H0, Hstate::H1, Hstate::H2, Hstate::H3,
            Hstate::H4, Hstate::H5, Hstate::H6, Hstate::H7,
        ]
    }
}

// LEVEL -> TARGET CORE COUNT. MONOTONICALLY NON-INCREASING IN INDEX.
#[derive(Clone, Copy, Debug)]
pub struct LevelTable {
    counts: [u32; NR_HSTATES],
}

impl LevelTable {
    // REFERENCE LADDER: H0 = ALL CORES, EACH DEEPER LEVEL SHEDS ONE MORE,
    // FLOORED AT A SINGLE CORE.
    pub fn for_cores(total: u32) -> Self {
        let total = total.max(1);
        let mut counts = [1u32; NR_HSTATES];
        for (i, slot) in counts.iter_mut().enumerate() {
            *slot = total.saturating_sub(i as u32).max(1);
        }
        Self { counts }
    }

    pub fn core_count(&self, state: Hstate) -> u32 {
        self.counts[state.index()]
    }

    // DEFENSIVE LOOKUP FOR RAW INDICES: OUT OF RANGE -> H0'S COUNT.
    pub fn core_count_for_index(&self, idx: usize) -> u32 {
        self.counts[Hstate::from_index(idx).index()]
    }
}

// --- HYSTERESIS DECIDER ---

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Action {
    Down,
    Up,
    Stay,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct Streaks {
    pub up: u32,
    pub down: u32,
}

impl Streaks {
    pub fn reset(&mut self) {
        self.up = 0;
        self.down = 0;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeciderParams {
    pub up_threshold: u32,
    pub down_threshold: u32,
    pub up_tasks: u32,
    pub down_tasks: u32,
    pub cpu_high_watermark: u32,
    pub cpu_low_watermark: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct LoadSample {
    pub online: u32,
    pub runnable: u32,
    pub cpu_load: u32,   // 0..100
    pub boost: bool,     // GPU LOAD >= GPU_BOOST_WATERMARK
}

// ONE TICK OF THE DECIDER. UPDATES THE STREAKS, RETURNS THE DIRECTION.
//
// THE FINAL else IS A DELIBERATE COAST STATE: NEITHER STREAK MOVES.
// DISTINCT FROM THE RESET-AND-STAY BRANCH ABOVE IT.
pub fn observe(streaks: &mut Streaks, p: &DeciderParams, s: &LoadSample) -> Action {
    if s.online * p.down_tasks >= s.runnable && !s.boost {
        if s.cpu_load <= p.cpu_low_watermark {
            streaks.down = (streaks.down + 1).min(STREAK_CLAMP);
            streaks.up = 0;
        } else {
            streaks.up = 0;
            streaks.down = 0;
        }
    } else if (s.cpu_load >= p.cpu_high_watermark && s.online * p.up_tasks <= s.runnable)
        || s.boost
    {
        streaks.up = (streaks.up + 1).min(STREAK_CLAMP);
        streaks.down = 0;
    }

    // STRICT GREATER-THAN: A STREAK EQUAL TO THE THRESHOLD DOES NOT FIRE YET.
    // BOOST IS ACTIONABLE ON THE TICK IT APPEARS; THE STREAKS ABOVE STILL
    // BOOKKEEP SO THE UP RUN SURVIVES THE BOOST GOING AWAY.
    if s.boost || streaks.up > p.up_threshold {
        Action::Up
    } else if streaks.down > p.down_threshold {
        Action::Down
    } else {
        Action::Stay
    }
}

// --- LEVEL SELECTOR ---

// MAP (COMMITTED LEVEL, DIRECTION) -> CANDIDATE LEVEL.
// DOWN SHEDS ONE LEVEL, UP JUMPS up_step LEVELS TOWARD FULL CORE COUNT.
pub fn adjust_level(prev: Hstate, action: Action, up_step: usize) -> Hstate {
    match action {
        Action::Down => Hstate::from_index((prev.index() + 1).min(NR_HSTATES - 1)),
        Action::Up => Hstate::from_index(prev.index().saturating_sub(up_step)),
        Action::Stay => prev,
    }
}

// --- BOUNDS CLAMP ---

// ceiling_lock IS THE EXTERNAL min_lock ATTRIBUTE: AN UPPER BOUND ON THE
// INDEX (FEWEST CORES ALLOWED TO BE SHED). floor_lock IS max_lock: A LOWER
// BOUND ON THE INDEX (MOST CORES ALLOWED TO BE SHED). NAMED BY INDEX
// DIRECTION ON PURPOSE.
#[derive(Clone, Copy, Debug)]
pub struct ClampContext {
    pub ceiling_lock: Option<Hstate>,
    pub floor_lock: Option<Hstate>,
    pub suspended: bool,
}

// RECONCILE A CANDIDATE AGAINST LOCKS AND THE SUSPEND/AWAKE WINDOW.
// A FORCED LEVEL BYPASSES EVERYTHING AND IS USED VERBATIM.
pub fn clamp_level(candidate: Hstate, force: bool, ctx: &ClampContext) -> Hstate {
    if force {
        return candidate;
    }

    let mut state = candidate;

    if let Some(ceiling) = ctx.ceiling_lock {
        if state > ceiling {
            state = ceiling;
        }
    }
    if let Some(floor) = ctx.floor_lock {
        if state < floor {
            state = floor;
        }
    }

    if !ctx.suspended && state > SCREEN_ON_CEILING {
        state = SCREEN_ON_CEILING;
    } else if ctx.suspended && state < SUSPENDED_FLOOR {
        state = SUSPENDED_FLOOR;
    }

    state
}
