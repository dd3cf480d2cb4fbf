//! Small shared helpers.

use std::time::Duration;

/// Renders an elapsed time for progress messages.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{} min {} s", secs / 60, secs % 60)
    } else {
        format!("{:.1} s", elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_durations_print_seconds() {
        assert_eq!(format_elapsed(Duration::from_millis(2500)), "2.5 s");
    }

    #[test]
    fn long_durations_print_minutes() {
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2 min 5 s");
    }
}
