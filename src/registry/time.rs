use std::time::Instant;

/// Wall time between start and stop, in one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeEvent {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeEvent {
    pub fn calculate(&self, start: Instant, end: Instant) -> f64 {
        let nanos = end.saturating_duration_since(start).as_nanos() as f64;
        match self {
            Self::Seconds => nanos / 1e9,
            Self::Milliseconds => nanos / 1e6,
            Self::Microseconds => nanos / 1e3,
            Self::Nanoseconds => nanos,
        }
    }
}

pub(super) fn builtin() -> [(&'static str, TimeEvent); 4] {
    [
        ("seconds", TimeEvent::Seconds),
        ("milliseconds", TimeEvent::Milliseconds),
        ("microseconds", TimeEvent::Microseconds),
        ("nanoseconds", TimeEvent::Nanoseconds),
    ]
}
