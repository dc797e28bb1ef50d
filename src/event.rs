// CLUSTERPLUG TRANSITION LOG
// RECORDS COMMITTED LEVEL TRANSITIONS DURING DAEMON EXECUTION
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE TICKING.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::policy::Hstate;

const MAX_RECORDS: usize = 4096;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cause {
    Auto,     // REGULAR TICK PIPELINE
    Forced,   // force_hstate WRITE
    Lock,     // min_lock / max_lock WRITE
    Suspend,  // SUSPEND EDGE
    Wake,     // WAKE EDGE BOOST
}

impl Cause {
    pub fn label(self) -> &'static str {
        match self {
            Cause::Auto => "AUTO",
            Cause::Forced => "FORCED",
            Cause::Lock => "LOCK",
            Cause::Suspend => "SUSPEND",
            Cause::Wake => "WAKE",
        }
    }
}

#[derive(Clone, Copy)]
pub struct Record {
    pub ts_ns: u64,
    pub from: Hstate,
    pub to: Hstate,
    pub online: u32,   // ONLINE COUNT REACHED AFTER CONVERGENCE
    pub cause: Cause,
}

pub struct TransitionLog {
    records: Vec<Record>,
    head: usize,
    len: usize,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self {
            records: vec![
                Record {
                    ts_ns: 0,
                    from: Hstate::H0,
                    to: Hstate::H0,
                    online: 0,
                    cause: Cause::Auto,
                };
                MAX_RECORDS
            ],
            head: 0,
            len: 0,
        }
    }

    // RECORD ONE COMMITTED TRANSITION. OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn record(&mut self, ts_ns: u64, from: Hstate, to: Hstate, online: u32, cause: Cause) {
        self.records[self.head] = Record { ts_ns, from, to, online, cause };
        self.head = (self.head + 1) % MAX_RECORDS;
        if self.len < MAX_RECORDS {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn iter_chronological(&self) -> impl Iterator<Item = &Record> {
        let start = if self.len < MAX_RECORDS { 0 } else { self.head };
        (0..self.len).map(move |i| &self.records[(start + i) % MAX_RECORDS])
    }

    // DUMP THE TIME SERIES AFTER EXECUTION
    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }

        let base_ts = self.iter_chronological().next().map(|r| r.ts_ns).unwrap_or(0);

        println!("\n{:<10} {:<6} {:<6} {:<8} {}", "TIME_S", "FROM", "TO", "ONLINE", "CAUSE");
        println!("{}", "-".repeat(44));
        for r in self.iter_chronological() {
            let elapsed_s = r.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            println!(
                "{:<10.1} {:<6} {:<6} {:<8} {}",
                elapsed_s,
                r.from.name(),
                r.to.name(),
                r.online,
                r.cause.label(),
            );
        }

        if self.len == MAX_RECORDS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} TRANSITIONS)", MAX_RECORDS);
        }
        println!("TOTAL TRANSITIONS LOGGED: {}", self.len);
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len == 0 {
            return;
        }

        let records: Vec<&Record> = self.iter_chronological().collect();

        let mut by_cause = [0u64; 5];
        let mut shallowest = Hstate::last();
        let mut deepest = Hstate::H0;
        for r in &records {
            let idx = match r.cause {
                Cause::Auto => 0,
                Cause::Forced => 1,
                Cause::Lock => 2,
                Cause::Suspend => 3,
                Cause::Wake => 4,
            };
            by_cause[idx] += 1;
            if r.to < shallowest {
                shallowest = r.to;
            }
            if r.to > deepest {
                deepest = r.to;
            }
        }

        let elapsed_ns = records.last().map(|r| r.ts_ns).unwrap_or(0)
            .saturating_sub(records.first().map(|r| r.ts_ns).unwrap_or(0));

        println!("\n{}", "=".repeat(50));
        println!("CLUSTERPLUG TRANSITION SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TOTAL TRANSITIONS: {}", self.len);
        println!(
            "  BY CAUSE:          AUTO {} / FORCED {} / LOCK {} / SUSPEND {} / WAKE {}",
            by_cause[0], by_cause[1], by_cause[2], by_cause[3], by_cause[4]
        );
        println!("  LEVEL RANGE:       {}..{}", shallowest.name(), deepest.name());
        println!("  ELAPSED:           {:.1}s", elapsed_ns as f64 / 1_000_000_000.0);
    }
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_stores_entry() {
        let mut log = TransitionLog::new();
        assert!(log.is_empty());

        log.record(10, Hstate::H0, Hstate::H1, 7, Cause::Auto);
        assert_eq!(log.len(), 1);
        assert_eq!(log.records[0].from, Hstate::H0);
        assert_eq!(log.records[0].to, Hstate::H1);
        assert_eq!(log.records[0].online, 7);
        assert_eq!(log.records[0].cause, Cause::Auto);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = TransitionLog::new();

        for i in 0..MAX_RECORDS {
            log.record(i as u64, Hstate::H0, Hstate::H1, 7, Cause::Auto);
        }
        assert_eq!(log.len(), MAX_RECORDS);
        assert_eq!(log.head, 0); // WRAPPED BACK TO START

        log.record(9999, Hstate::H1, Hstate::H0, 8, Cause::Wake);
        assert_eq!(log.len(), MAX_RECORDS);
        assert_eq!(log.head, 1);
        assert_eq!(log.records[0].ts_ns, 9999);

        // CHRONOLOGICAL ITERATION STARTS FROM THE OLDEST SURVIVING ENTRY
        let ordered: Vec<u64> = log.iter_chronological().map(|r| r.ts_ns).collect();
        assert_eq!(ordered[0], 1);
        assert_eq!(*ordered.last().unwrap(), 9999);
        assert_eq!(ordered.len(), MAX_RECORDS);
    }

    #[test]
    fn summary_no_panic_empty() {
        let log = TransitionLog::new();
        log.summary();
    }

    #[test]
    fn dump_no_panic() {
        let mut log = TransitionLog::new();
        log.record(100, Hstate::H0, Hstate::H1, 7, Cause::Auto);
        log.record(200, Hstate::H1, Hstate::H6, 2, Cause::Suspend);
        log.dump();
    }
}
