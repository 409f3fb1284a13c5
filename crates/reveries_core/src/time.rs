//! Wall-clock arithmetic for ages, gaps, and decay.
//!
//! Wall clock is authoritative for timestamps and decay; relative durations
//! clamp to zero so clock jumps never corrupt derived values.

const MINUTE: i64 = 60;
const HOUR: i64 = 3600;
const DAY: i64 = 86_400;
const WEEK: i64 = 7 * DAY;

/// Seconds between `then` and `now`, clamped to zero.
pub fn seconds_since(then: i64, now: i64) -> i64 {
    (now - then).max(0)
}

/// Fractional days between `then` and `now`, clamped to zero.
pub fn days_since(then: i64, now: i64) -> f64 {
    seconds_since(then, now) as f64 / DAY as f64
}

/// Human-readable duration, two units at most: "2 days and 3 hours".
pub fn humanize_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    if seconds < MINUTE {
        return format!("{} seconds", seconds);
    }

    let (major_unit, major_name, minor_unit, minor_name) = if seconds >= DAY {
        (DAY, "day", HOUR, "hour")
    } else if seconds >= HOUR {
        (HOUR, "hour", MINUTE, "minute")
    } else {
        (MINUTE, "minute", 1, "second")
    };

    let major = seconds / major_unit;
    let minor = (seconds % major_unit) / minor_unit;

    let mut out = format!("{} {}{}", major, major_name, plural(major));
    if minor > 0 {
        out.push_str(&format!(" and {} {}{}", minor, minor_name, plural(minor)));
    }
    out
}

/// Relative age for memory listings: "just now", "5 minutes ago", "3 days ago".
pub fn relative_age(then: i64, now: i64) -> String {
    let secs = seconds_since(then, now);
    if secs < MINUTE {
        return "just now".to_string();
    }
    let (count, unit) = if secs >= WEEK {
        (secs / WEEK, "week")
    } else if secs >= DAY {
        (secs / DAY, "day")
    } else if secs >= HOUR {
        (secs / HOUR, "hour")
    } else {
        (secs / MINUTE, "minute")
    };
    format!("{} {}{} ago", count, unit, plural(count))
}

/// Calibrated framing sentence for a conversation gap, keyed on duration.
///
/// Returns `None` for non-positive gaps.
pub fn gap_framing(seconds: i64) -> Option<&'static str> {
    if seconds <= 0 {
        return None;
    }
    let framing = if seconds < MINUTE {
        "This is a continuation of the conversation you were just having. Do not greet them again."
    } else if seconds < 10 * MINUTE {
        "Only a few minutes have passed. Pick up where you left off."
    } else if seconds < HOUR {
        "A short break has passed. The earlier thread is likely still fresh for both of you."
    } else if seconds < 4 * HOUR {
        "A few hours have passed. They may have been busy with something in between."
    } else if seconds < DAY {
        "Most of a day has passed. Things may have moved on since you last spoke."
    } else if seconds < 2 * DAY {
        "About a day has passed. A brief acknowledgment of the time is natural."
    } else if seconds < WEEK {
        "Several days have passed. Their circumstances may have changed."
    } else if seconds < 2 * WEEK {
        "More than a week has passed. Treat earlier details as possibly out of date."
    } else {
        "This is a significant gap. Be curious about what has happened; do not assume anything is still the same."
    };
    Some(framing)
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
