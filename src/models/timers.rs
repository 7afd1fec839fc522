use serde::{Deserialize, Serialize};

use crate::models::event::{SessionEvent, StopwatchAction};

/// Which bucket is currently accruing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    NotStarted,
    Work,
    Break,
}

/// Accumulated durations, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timers {
    pub total_ms: i64,
    pub work_ms: i64,
    pub break_ms: i64,
}

/// The result of replaying an event log: current counters plus the mode the
/// stopwatch is in. `mode` is `None` once a `finish` event has been replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerReport {
    pub timers: Timers,
    pub mode: Option<TimerMode>,
}

impl Default for TimerReport {
    fn default() -> Self {
        TimerReport {
            timers: Timers::default(),
            mode: Some(TimerMode::NotStarted),
        }
    }
}

/// Replays an ordered event log into current elapsed-time counters.
///
/// This is a pure function of the log and `now_ms`: no hidden state, so any
/// client replaying the same log reproduces identical values. `work`/`break`
/// only accrue at mode transitions; `total` is wall clock since the first
/// `start` (up to the `finish` timestamp once the stopwatch is finished).
pub fn reconstruct(events: &[SessionEvent], now_ms: i64) -> TimerReport {
    let mut timers = Timers::default();
    let mut mode = Some(TimerMode::NotStarted);
    let mut start_ms: Option<i64> = None;
    let mut last_tick_ms: Option<i64> = None;

    for event in events {
        let SessionEvent::Stopwatch {
            action,
            timestamp_ms,
        } = event
        else {
            continue;
        };

        match action {
            StopwatchAction::Start => {
                start_ms = Some(*timestamp_ms);
                last_tick_ms = Some(*timestamp_ms);
                mode = Some(TimerMode::Work);
            }
            StopwatchAction::Break => {
                accrue(&mut timers, mode, last_tick_ms, *timestamp_ms);
                mode = Some(TimerMode::Break);
                last_tick_ms = Some(*timestamp_ms);
            }
            StopwatchAction::Resume => {
                accrue(&mut timers, mode, last_tick_ms, *timestamp_ms);
                mode = Some(TimerMode::Work);
                last_tick_ms = Some(*timestamp_ms);
            }
            StopwatchAction::Finish => {
                accrue(&mut timers, mode, last_tick_ms, *timestamp_ms);
                mode = None;
                last_tick_ms = Some(*timestamp_ms);
            }
        }
    }

    if let Some(start) = start_ms {
        // Once finished, total stops at the last event; otherwise it tracks now.
        let end = match mode {
            None => last_tick_ms.unwrap_or(start),
            Some(_) => now_ms,
        };
        timers.total_ms = (end - start).max(0);
    }

    TimerReport { timers, mode }
}

fn accrue(timers: &mut Timers, mode: Option<TimerMode>, last_tick_ms: Option<i64>, now_ms: i64) {
    let Some(last) = last_tick_ms else {
        return;
    };
    let elapsed = (now_ms - last).max(0);
    match mode {
        Some(TimerMode::Work) => timers.work_ms += elapsed,
        Some(TimerMode::Break) => timers.break_ms += elapsed,
        Some(TimerMode::NotStarted) | None => {}
    }
}
