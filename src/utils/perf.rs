//! Performance measurement utilities for memory and timing analysis.
//!
//! Peak memory is read from /proc/self/status, so it is only meaningful on Linux.

use std::time::Instant;

/// Reads the peak resident set size (VmHWM) from /proc/self/status on Linux.
///
/// # Returns
/// The peak resident memory in kilobytes (KB), or 0 if the value cannot be read.
#[cfg(target_os = "linux")]
pub fn get_peak_rss_kb() -> u64 {
    let Ok(status_content) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };

    status_content
        .lines()
        .find(|line| line.starts_with("VmHWM:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// A dummy implementation for non-Linux platforms to ensure the code compiles.
#[cfg(not(target_os = "linux"))]
pub fn get_peak_rss_kb() -> u64 {
    use std::sync::Once;
    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Peak RSS measurement is only supported on Linux; returning 0.");
    });
    0
}

/// Runs `f` `repeats` times and returns the last result together with the mean
/// wall-clock time per run in seconds.
pub fn time_mean<T, E>(repeats: usize, mut f: impl FnMut() -> Result<T, E>) -> Result<(T, f64), E> {
    let repeats = repeats.max(1);
    let start = Instant::now();
    let mut last = f()?;
    for _ in 1..repeats {
        last = f()?;
    }
    let mean = start.elapsed().as_secs_f64() / repeats as f64;
    Ok((last, mean))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_mean_runs_requested_times() {
        let mut calls = 0;
        let (value, secs) = time_mean::<_, ()>(3, || {
            calls += 1;
            Ok(calls)
        })
        .unwrap();
        assert_eq!(value, 3);
        assert!(secs >= 0.0);
    }
}
