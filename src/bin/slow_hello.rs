//! The canonical demo tracee
//!
//! Prints five fixed lines with a one-second pause after the first, giving
//! `steptrace run` something deterministic to record. Takes no arguments.

use steptrace::demo::Demo;

fn main() -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    Demo::new().run(&mut out)?;
    Ok(())
}
