//! Canonical demo tracee
//!
//! A small, deterministic program whose run produces a recognizable
//! instruction stream:
//! - prints a banner, then pauses so a tracer has time to attach
//! - computes Fibonacci(10) with the naive recursion, giving the trace a
//!   deep call/return cascade
//! - sums a short list and reports it before exiting
//!
//! The output lines mirror the Python script this tool was first pointed at,
//! so traces of either can be compared side by side.

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

/// Naive recursive Fibonacci
///
/// Deliberately not memoized: the point is the call tree it produces under
/// the tracer, not the arithmetic.
#[must_use]
pub fn fibonacci(n: u64) -> u64 {
    if n <= 1 {
        n
    } else {
        fibonacci(n - 1) + fibonacci(n - 2)
    }
}

/// The demo program, with an adjustable attach pause
#[derive(Debug, Clone)]
pub struct Demo {
    pause: Duration,
}

impl Demo {
    /// Demo with the standard one-second attach pause
    #[must_use]
    pub fn new() -> Self {
        Self {
            pause: Duration::from_secs(1),
        }
    }

    /// Demo with a custom pause, used by tests to avoid real waits
    #[must_use]
    pub fn with_pause(pause: Duration) -> Self {
        Self { pause }
    }

    /// Run the demo, writing its five lines to `out`
    ///
    /// The banner is flushed before the pause so an observer sees it while
    /// the program is still waiting.
    pub fn run<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Starting Python program...")?;
        out.flush()?;

        thread::sleep(self.pause);
        writeln!(out, "Hello from Python!")?;

        let fib = fibonacci(10);
        writeln!(out, "Fibonacci(10) = {fib}")?;

        let numbers: [i64; 5] = [1, 2, 3, 4, 5];
        let total: i64 = numbers.iter().sum();
        writeln!(out, "Sum of {numbers:?} = {total}")?;

        writeln!(out, "Done!")?;
        out.flush()
    }
}

impl Default for Demo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn fibonacci_base_cases() {
        assert_eq!(fibonacci(0), 0);
        assert_eq!(fibonacci(1), 1);
        assert_eq!(fibonacci(2), 1);
    }

    #[test]
    fn fibonacci_known_values() {
        assert_eq!(fibonacci(5), 5);
        assert_eq!(fibonacci(10), 55);
    }

    #[test]
    fn run_prints_exactly_five_lines() {
        let mut out = Vec::new();
        Demo::with_pause(Duration::ZERO)
            .run(&mut out)
            .expect("writing to a Vec cannot fail");

        let text = String::from_utf8(out).expect("demo output is utf-8");
        assert_eq!(
            text,
            "Starting Python program...\n\
             Hello from Python!\n\
             Fibonacci(10) = 55\n\
             Sum of [1, 2, 3, 4, 5] = 15\n\
             Done!\n"
        );
    }

    #[test]
    fn run_waits_between_banner_and_greeting() {
        let pause = Duration::from_millis(50);
        let start = Instant::now();
        Demo::with_pause(pause)
            .run(&mut Vec::new())
            .expect("writing to a Vec cannot fail");

        assert!(start.elapsed() >= pause);
    }
}
