//! Wall-clock aligned polling loop.
//!
//! A loop spec is a timespec followed by optional presentation flags:
//! `c` clears the screen (interactive only), `t` prints a timestamp and `r`
//! prints a ruler before each tick. `5mct` runs every five minutes on the
//! five-minute boundaries of the local day. Only the trailing run of
//! characters that are neither digits nor timespec units holds flags.
//!
//! Ticks are aligned to `interval` boundaries since local midnight, so a
//! 15 minute loop fires on the quarter-hour no matter when it was started.

use chrono::{Local, Timelike};
use std::io::Write;
use std::thread;
use std::time::Duration;

use crate::error::{NhcError, Result};
use crate::timespec;

pub const DEFAULT_INTERVAL_SECS: u64 = 300;
const SLEEP_SLICE: Duration = Duration::from_millis(200);
const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSpec {
    pub interval: u64,
    pub clear_screen: bool,
    pub timestamp: bool,
    pub ruler: bool,
}

pub fn parse_loop_spec(raw: &str) -> LoopSpec {
    let mut spec = LoopSpec {
        interval: 0,
        clear_screen: false,
        timestamp: false,
        ruler: false,
    };
    let split = raw
        .char_indices()
        .rev()
        .take_while(|(_, ch)| !is_timespec_char(*ch))
        .last()
        .map(|(index, _)| index)
        .unwrap_or(raw.len());
    let (duration, flags) = raw.split_at(split);
    for ch in flags.chars() {
        match ch.to_ascii_lowercase() {
            'c' => spec.clear_screen = true,
            't' => spec.timestamp = true,
            'r' => spec.ruler = true,
            other => tracing::warn!(loop_spec = raw, flag = %other, "Ignoring unknown loop flag"),
        }
    }

    spec.interval = timespec::parse(duration).seconds;
    if spec.interval == 0 {
        tracing::warn!(
            loop_spec = raw,
            default_secs = DEFAULT_INTERVAL_SECS,
            "Loop interval is zero or malformed; using default"
        );
        spec.interval = DEFAULT_INTERVAL_SECS;
    }
    spec
}

fn is_timespec_char(ch: char) -> bool {
    ch.is_ascii_digit() || matches!(ch.to_ascii_lowercase(), 'w' | 'd' | 'h' | 'm' | 's' | 'f')
}

/// Time until the next `interval` boundary counted from local midnight.
/// Exactly on a boundary, the next one is a full interval away.
pub fn next_delay(since_midnight: Duration, interval: u64) -> Duration {
    let interval = Duration::from_secs(interval.max(1));
    let elapsed_nanos = since_midnight.as_nanos() % interval.as_nanos();
    interval - Duration::from_nanos(elapsed_nanos as u64)
}

pub trait Clock {
    fn since_midnight(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn since_midnight(&self) -> Duration {
        let now = Local::now();
        Duration::new(
            u64::from(now.num_seconds_from_midnight()),
            now.nanosecond() % 1_000_000_000,
        )
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Signal(i32),
}

pub struct Scheduler<C: Clock> {
    spec: LoopSpec,
    clock: C,
    interactive: bool,
    stop: Box<dyn Fn() -> Option<i32>>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(spec: LoopSpec, clock: C, interactive: bool) -> Self {
        Self {
            spec,
            clock,
            interactive,
            stop: Box::new(crate::shutdown::pending_signal),
        }
    }

    /// Replaces the signal check (tests stop the loop this way).
    pub fn with_stop(mut self, stop: impl Fn() -> Option<i32> + 'static) -> Self {
        self.stop = Box::new(stop);
        self
    }

    pub fn spec(&self) -> LoopSpec {
        self.spec
    }

    /// Runs `tick` on every boundary until a signal arrives or a tick fails.
    pub fn run<F>(&self, out: &mut dyn Write, mut tick: F) -> Result<LoopExit>
    where
        F: FnMut() -> Result<()>,
    {
        tracing::info!(interval_secs = self.spec.interval, "Polling loop started");
        loop {
            let delay = next_delay(self.clock.since_midnight(), self.spec.interval);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Sleeping until next boundary");
            if let Some(signal) = self.sleep_until_boundary(delay) {
                return Ok(self.exit(signal));
            }

            self.present(out)?;
            tick()?;

            if let Some(signal) = (self.stop)() {
                return Ok(self.exit(signal));
            }
        }
    }

    fn sleep_until_boundary(&self, delay: Duration) -> Option<i32> {
        let mut remaining = delay;
        loop {
            if let Some(signal) = (self.stop)() {
                return Some(signal);
            }
            if remaining.is_zero() {
                return None;
            }
            let slice = remaining.min(SLEEP_SLICE);
            self.clock.sleep(slice);
            remaining -= slice;
        }
    }

    fn present(&self, out: &mut dyn Write) -> Result<()> {
        let write_err = |err: std::io::Error| NhcError::io("write loop header", err);
        if self.spec.clear_screen && self.interactive {
            out.write_all(CLEAR_SCREEN.as_bytes()).map_err(write_err)?;
        }
        if self.spec.ruler {
            writeln!(out, "{}", ruler(terminal_width())).map_err(write_err)?;
        }
        if self.spec.timestamp {
            writeln!(out, "{}", Local::now().format("%Y-%m-%d %H:%M:%S %Z")).map_err(write_err)?;
        }
        out.flush().map_err(write_err)
    }

    fn exit(&self, signal: i32) -> LoopExit {
        tracing::info!(signal, "Polling loop stopped by signal");
        LoopExit::Signal(signal)
    }
}

fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .filter(|width: &usize| *width > 0)
        .unwrap_or(80)
}

fn ruler(width: usize) -> String {
    "-".repeat(width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeClock {
        now: Rc<Cell<Duration>>,
    }

    impl Clock for FakeClock {
        fn since_midnight(&self) -> Duration {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
        }
    }

    #[test]
    fn parse_loop_spec_separates_flags_from_interval() {
        let spec = parse_loop_spec("15mct");
        assert_eq!(spec.interval, 900);
        assert!(spec.clear_screen);
        assert!(spec.timestamp);
        assert!(!spec.ruler);

        let spec = parse_loop_spec("1h30mr");
        assert_eq!(spec.interval, 5400);
        assert!(spec.ruler);
    }

    #[test]
    fn flags_only_count_at_the_end() {
        // Parsing stops at the stray `c`; nothing after it is a flag.
        let spec = parse_loop_spec("1hc5m");
        assert_eq!(spec.interval, 3600);
        assert!(!spec.clear_screen);

        let spec = parse_loop_spec("90");
        assert_eq!(spec.interval, 90);
        assert!(!spec.timestamp && !spec.ruler && !spec.clear_screen);
    }

    #[test]
    fn zero_interval_falls_back_to_default() {
        assert_eq!(parse_loop_spec("").interval, DEFAULT_INTERVAL_SECS);
        assert_eq!(parse_loop_spec("tx").interval, DEFAULT_INTERVAL_SECS);
    }

    #[test]
    fn next_delay_aligns_to_quarter_hour() {
        // 10 minutes past a quarter-hour boundary.
        let since = Duration::from_secs(9 * 3600 + 15 * 60 + 10 * 60);
        assert_eq!(next_delay(since, 900), Duration::from_secs(300));

        // The elapsed fraction is subtracted too.
        let since = since + Duration::from_millis(250);
        assert_eq!(
            next_delay(since, 900),
            Duration::from_secs(300) - Duration::from_millis(250)
        );
    }

    #[test]
    fn next_delay_on_boundary_is_full_interval() {
        assert_eq!(
            next_delay(Duration::from_secs(3600), 900),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn ticks_land_on_boundaries_until_signal() {
        let now = Rc::new(Cell::new(Duration::from_secs(10)));
        let clock = FakeClock { now: now.clone() };
        let ticks = Rc::new(Cell::new(0u32));

        let ticks_seen = ticks.clone();
        let scheduler = Scheduler::new(parse_loop_spec("60"), clock, false).with_stop(move || {
            if ticks_seen.get() >= 3 {
                Some(libc::SIGTERM)
            } else {
                None
            }
        });

        let mut boundaries = Vec::new();
        let exit = scheduler
            .run(&mut Vec::new(), || {
                ticks.set(ticks.get() + 1);
                boundaries.push(now.get());
                Ok(())
            })
            .unwrap();

        assert_eq!(exit, LoopExit::Signal(libc::SIGTERM));
        assert_eq!(
            boundaries,
            vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(180)
            ]
        );
    }

    #[test]
    fn signal_during_sleep_skips_tick() {
        let clock = FakeClock {
            now: Rc::new(Cell::new(Duration::ZERO)),
        };
        let scheduler =
            Scheduler::new(parse_loop_spec("5m"), clock, false).with_stop(|| Some(libc::SIGINT));

        let mut ran = false;
        let exit = scheduler
            .run(&mut Vec::new(), || {
                ran = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(exit, LoopExit::Signal(libc::SIGINT));
        assert!(!ran);
    }

    #[test]
    fn tick_error_ends_loop() {
        let clock = FakeClock {
            now: Rc::new(Cell::new(Duration::ZERO)),
        };
        let scheduler = Scheduler::new(parse_loop_spec("1s"), clock, false).with_stop(|| None);

        let err = scheduler
            .run(&mut Vec::new(), || {
                Err(NhcError::insecure("/tmp/state", "owned by uid 0"))
            })
            .unwrap_err();
        assert!(matches!(err, NhcError::InsecureStateDir { .. }));
    }

    #[test]
    fn header_respects_flags_and_interactivity() {
        let clock = FakeClock {
            now: Rc::new(Cell::new(Duration::ZERO)),
        };
        let done = Rc::new(Cell::new(false));
        let done_check = done.clone();
        let scheduler = Scheduler::new(parse_loop_spec("1scrt"), clock, false).with_stop(
            move || {
                if done_check.get() {
                    Some(libc::SIGHUP)
                } else {
                    None
                }
            },
        );

        let mut out = Vec::new();
        scheduler
            .run(&mut out, || {
                done.set(true);
                Ok(())
            })
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains(CLEAR_SCREEN), "not interactive, no clear");
        let mut lines = text.lines();
        assert!(lines.next().unwrap().chars().all(|c| c == '-'));
        assert!(lines.next().unwrap().starts_with("20"));
    }
}
