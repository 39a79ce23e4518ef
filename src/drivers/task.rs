//! Named worker threads for the gateway loops.

use std::io;
use std::thread::{Builder, JoinHandle};

use log::info;

/// Spawn a named thread with an explicit stack size.
///
/// Every long-running loop gets its own OS thread; the name shows up in
/// `ps -T` and in panic messages.
pub fn spawn_loop(
    name: &'static str,
    stack_kb: usize,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    info!(target: "gateway", "spawning '{name}' (stack={stack_kb}KB)");
    Builder::new()
        .name(name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}
