// CLUSTERPLUG CONTROL SURFACE
// RUNTIME READ/WRITE OF THE GOVERNOR'S TUNABLES, LOCKS AND FORCED LEVEL
// OVER A LINE-ORIENTED UNIX SOCKET.
//
// ONE UNIFORM ACCESSOR TABLE OVER THE FIXED ATTRIBUTE SET -- EACH ENTRY IS
// A GETTER AND AN OPTIONAL SETTER -- INSTEAD OF A HAND-DUPLICATED PAIR OF
// FUNCTIONS PER FIELD.
//
// PROTOCOL (ONE REQUEST PER CONNECTION, EOF-DELIMITED REPLY):
//   get <attr>            -> "<value>"
//   set <attr> <value>    -> "OK"
//   time_in_state         -> ONE "Hn <ms>" LINE PER LEVEL
//   ANY FAILURE           -> "ERR <msg>"

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::engine::{Engine, LockPlan, LockWrite};
use crate::policy::{Hstate, NR_HSTATES};
use crate::timer::TickTimer;

pub const DEFAULT_SOCKET: &str = "/run/clusterplug.sock";

struct AttrSpec {
    name: &'static str,
    read: fn(&Engine) -> String,
    write: Option<fn(&Engine, &TickTimer, i64) -> Result<()>>,
}

fn lock_as_i64(lock: Option<Hstate>) -> i64 {
    lock.map(|h| h.index() as i64).unwrap_or(-1)
}

fn expect_non_negative(value: i64) -> Result<u32> {
    if value < 0 {
        bail!("VALUE MUST BE NON-NEGATIVE");
    }
    Ok(value as u32)
}

// THE min_lock/max_lock WRITE: PLAN UNDER THE CONTROL LOCK, THEN RUN THE
// CANCEL-AND-COMMIT DANCE ONLY WHEN THE COMMITTED LEVEL VIOLATES THE BOUND.
fn apply_lock_write(engine: &Engine, timer: &TickTimer, which: LockWrite, value: i64) -> Result<()> {
    match engine.plan_lock_write(which, value)? {
        // A REJECTED WRITE (FORCE ACTIVE) IS STILL ACKNOWLEDGED.
        LockPlan::Rejected | LockPlan::Stored => Ok(()),
        LockPlan::Cleared => {
            timer.arm(Duration::from_millis(engine.sampling_rate_ms()));
            Ok(())
        }
        LockPlan::Transition(level) => {
            timer.cancel_and_wait();
            engine.commit_lock_transition(which, level);
            timer.arm(Duration::from_millis(engine.sampling_rate_ms()));
            Ok(())
        }
    }
}

fn apply_force_write(engine: &Engine, timer: &TickTimer, value: i64) -> Result<()> {
    if value >= NR_HSTATES as i64 {
        bail!("INVALID LEVEL INDEX {}", value);
    }
    if value < 0 {
        // CLEARING THE FORCE NEVER TRANSITIONS, ONLY RE-ARMS THE TICK.
        engine.clear_force();
        timer.arm(Duration::from_millis(engine.sampling_rate_ms()));
        return Ok(());
    }

    timer.cancel_and_wait();
    engine.force_to(Hstate::from_index(value as usize));
    timer.arm(Duration::from_millis(engine.sampling_rate_ms()));
    Ok(())
}

static ATTRS: [AttrSpec; 9] = [
    AttrSpec {
        name: "up_threshold",
        read: |e| e.tunables().up_threshold.to_string(),
        write: Some(|e, _t, v| {
            let v = expect_non_negative(v)?;
            e.update_tunables(|t| t.up_threshold = v);
            Ok(())
        }),
    },
    AttrSpec {
        name: "down_threshold",
        read: |e| e.tunables().down_threshold.to_string(),
        write: Some(|e, _t, v| {
            let v = expect_non_negative(v)?;
            e.update_tunables(|t| t.down_threshold = v);
            Ok(())
        }),
    },
    AttrSpec {
        name: "sampling_rate",
        read: |e| e.sampling_rate_ms().to_string(),
        write: Some(|e, _t, v| {
            if v <= 0 {
                bail!("SAMPLING RATE MUST BE POSITIVE MILLISECONDS");
            }
            e.set_sampling_rate_ms(v as u64);
            Ok(())
        }),
    },
    AttrSpec {
        name: "up_tasks",
        read: |e| e.tunables().up_tasks.to_string(),
        write: Some(|e, _t, v| {
            let v = expect_non_negative(v)?;
            e.update_tunables(|t| t.up_tasks = v);
            Ok(())
        }),
    },
    AttrSpec {
        name: "down_tasks",
        read: |e| e.tunables().down_tasks.to_string(),
        write: Some(|e, _t, v| {
            let v = expect_non_negative(v)?;
            e.update_tunables(|t| t.down_tasks = v);
            Ok(())
        }),
    },
    AttrSpec {
        name: "min_lock",
        read: |e| lock_as_i64(e.ceiling_lock()).to_string(),
        write: Some(|e, t, v| apply_lock_write(e, t, LockWrite::Ceiling, v)),
    },
    AttrSpec {
        name: "max_lock",
        read: |e| lock_as_i64(e.floor_lock()).to_string(),
        write: Some(|e, t, v| apply_lock_write(e, t, LockWrite::Floor, v)),
    },
    AttrSpec {
        name: "force_hstate",
        read: |e| lock_as_i64(e.forced_level()).to_string(),
        write: Some(apply_force_write),
    },
    AttrSpec {
        name: "cur_hstate",
        read: |e| e.current_level().index().to_string(),
        write: None,
    },
];

fn find_attr(name: &str) -> Option<&'static AttrSpec> {
    ATTRS.iter().find(|a| a.name == name)
}

// DISPATCH ONE REQUEST LINE. ALWAYS RETURNS A COMPLETE REPLY.
pub fn handle_request(engine: &Engine, timer: &TickTimer, line: &str) -> String {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("get"), Some(name), None) => match find_attr(name) {
            Some(spec) => format!("{}\n", (spec.read)(engine)),
            None => format!("ERR UNKNOWN ATTRIBUTE {}\n", name),
        },
        (Some("set"), Some(name), Some(raw)) => {
            let spec = match find_attr(name) {
                Some(s) => s,
                None => return format!("ERR UNKNOWN ATTRIBUTE {}\n", name),
            };
            let write = match spec.write {
                Some(w) => w,
                None => return format!("ERR {} IS READ-ONLY\n", name),
            };
            let value: i64 = match raw.parse() {
                Ok(v) => v,
                Err(_) => return format!("ERR NOT AN INTEGER: {}\n", raw),
            };
            match write(engine, timer, value) {
                Ok(()) => "OK\n".to_string(),
                Err(e) => format!("ERR {}\n", e),
            }
        }
        (Some("time_in_state"), None, None) => {
            let ms = engine.time_in_state_ms();
            let mut out = String::new();
            for (state, ms) in Hstate::all().iter().zip(ms.iter()) {
                out.push_str(&format!("{} {}\n", state.name(), ms));
            }
            out
        }
        _ => "ERR BAD REQUEST\n".to_string(),
    }
}

// --- SERVER ---

pub fn bind(path: &Path) -> Result<UnixListener> {
    // A STALE SOCKET FROM AN UNCLEAN SHUTDOWN BLOCKS THE BIND.
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("BINDING CONTROL SOCKET {}", path.display()))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

// ACCEPT LOOP. RUNS ON THE MAIN THREAD UNTIL SHUTDOWN FLIPS.
pub fn serve(
    listener: &UnixListener,
    engine: &Arc<Engine>,
    timer: &Arc<TickTimer>,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(e) = handle_client(stream, engine, timer) {
                    eprintln!("WARN: CONTROL CLIENT FAILED: {:#}", e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                eprintln!("WARN: ACCEPT FAILED: {}", e);
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn handle_client(mut stream: UnixStream, engine: &Engine, timer: &TickTimer) -> Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut line = String::new();
    while reader.read_line(&mut line)? > 0 {
        let reply = handle_request(engine, timer, line.trim());
        stream.write_all(reply.as_bytes())?;
        line.clear();
    }
    Ok(())
}

// --- CLIENT ---

// ONE REQUEST, REPLY READ TO EOF. USED BY THE get/set/time-in-state
// SUBCOMMANDS AGAINST A RUNNING DAEMON.
pub fn request(socket: &Path, line: &str) -> Result<String> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("CONNECTING TO {} (IS THE DAEMON RUNNING?)", socket.display()))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.shutdown(std::net::Shutdown::Write)?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;
    Ok(reply)
}
