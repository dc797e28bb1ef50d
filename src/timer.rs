// CLUSTERPLUG TICK TIMER
// SINGLE DELAYED INVOCATION, RE-ARMED AFTER EACH TICK COMPLETES.
// NO OVERLAP BETWEEN TICKS: THE NEXT DEADLINE IS ONLY SET ONCE THE
// CURRENT TICK BODY HAS RETURNED.
//
// cancel_and_wait() IS THE CANCEL-AND-REARM DANCE FOR FORCED TRANSITIONS:
// IT DISARMS THE PENDING DEADLINE AND BLOCKS UNTIL ANY IN-FLIGHT TICK
// FINISHES, SO A STALE SCHEDULED TICK CAN NEVER UNDO A JUST-APPLIED
// FORCED TRANSITION.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct TimerState {
    deadline: Option<Instant>,
    running: bool,
    cancelled: bool,
    shutdown: bool,
}

pub struct TickTimer {
    state: Mutex<TimerState>,
    cv: Condvar,
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TimerState {
                deadline: None,
                running: false,
                cancelled: false,
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    // SCHEDULE THE NEXT TICK `delay` FROM NOW, CLEARING ANY PRIOR CANCEL.
    pub fn arm(&self, delay: Duration) {
        let mut st = self.state.lock().unwrap();
        st.cancelled = false;
        st.deadline = Some(Instant::now() + delay);
        self.cv.notify_all();
    }

    // DISARM THE PENDING TICK AND WAIT OUT ANY IN-FLIGHT ONE.
    pub fn cancel_and_wait(&self) {
        let mut st = self.state.lock().unwrap();
        st.cancelled = true;
        st.deadline = None;
        while st.running {
            st = self.cv.wait(st).unwrap();
        }
    }

    pub fn shutdown(&self) {
        let mut st = self.state.lock().unwrap();
        st.shutdown = true;
        st.deadline = None;
        self.cv.notify_all();
    }

    // TIMER THREAD BODY. `tick` RUNS OUTSIDE THE TIMER LOCK AND RETURNS THE
    // DELAY UNTIL THE NEXT INVOCATION (THE ENGINE'S CURRENT SAMPLING RATE).
    pub fn run<F>(&self, mut tick: F)
    where
        F: FnMut() -> Duration,
    {
        let mut st = self.state.lock().unwrap();
        loop {
            if st.shutdown {
                return;
            }
            match st.deadline {
                None => {
                    st = self.cv.wait(st).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now < deadline {
                        let (guard, _) = self.cv.wait_timeout(st, deadline - now).unwrap();
                        st = guard;
                        continue;
                    }

                    st.deadline = None;
                    st.running = true;
                    drop(st);

                    let next = tick();

                    st = self.state.lock().unwrap();
                    st.running = false;
                    self.cv.notify_all();
                    // A CONCURRENT cancel_and_wait() SUPPRESSES THE RE-ARM;
                    // THE CALLER ARMS AGAIN ONCE ITS TRANSITION IS COMMITTED.
                    if !st.cancelled && !st.shutdown && st.deadline.is_none() {
                        st.deadline = Some(Instant::now() + next);
                    }
                }
            }
        }
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn armed_timer_fires_and_rearms() {
        let timer = Arc::new(TickTimer::new());
        let ticks = Arc::new(AtomicU32::new(0));

        let t = Arc::clone(&timer);
        let c = Arc::clone(&ticks);
        let handle = std::thread::spawn(move || {
            t.run(|| {
                c.fetch_add(1, Ordering::Relaxed);
                Duration::from_millis(5)
            });
        });

        timer.arm(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(60));
        timer.shutdown();
        handle.join().unwrap();

        assert!(ticks.load(Ordering::Relaxed) >= 2);
    }

    #[test]
    fn cancel_and_wait_suppresses_pending_tick() {
        let timer = Arc::new(TickTimer::new());
        let ticks = Arc::new(AtomicU32::new(0));

        let t = Arc::clone(&timer);
        let c = Arc::clone(&ticks);
        let handle = std::thread::spawn(move || {
            t.run(|| {
                c.fetch_add(1, Ordering::Relaxed);
                Duration::from_millis(5)
            });
        });

        timer.arm(Duration::from_millis(50));
        timer.cancel_and_wait();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(ticks.load(Ordering::Relaxed), 0);

        timer.shutdown();
        handle.join().unwrap();
    }
}
