//! Kernel console. Boot code installs the serial or video writer as the sink;
//! until then (and always on the host) output goes to the standard streams.

use core::fmt::{self, Write};
use spin::Mutex;

type Sink = &'static mut (dyn Write + Send);

pub struct Console {
    sink: Option<Sink>,
    error_sink: Option<Sink>,
}

pub static CONSOLE: Mutex<Console> = Mutex::new(Console {
    sink: None,
    error_sink: None,
});

/// Route `print!`/`println!` to `sink`, and `eprint!`/`eprintln!` to
/// `error_sink` if given, otherwise to `sink` as well.
pub fn install(sink: Sink, error_sink: Option<Sink>) {
    let mut console = CONSOLE.lock();
    console.sink = Some(sink);
    console.error_sink = error_sink;
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let mut console = CONSOLE.lock();
    if let Some(sink) = console.sink.as_mut() {
        // Nothing sensible to do if the console itself fails.
        let _ = sink.write_fmt(args);
        return;
    }
    drop(console);

    #[cfg(not(target_os = "none"))]
    std::print!("{args}");
}

#[doc(hidden)]
pub fn _eprint(args: fmt::Arguments) {
    let mut console = CONSOLE.lock();
    let Console { sink, error_sink } = &mut *console;
    if let Some(sink) = error_sink.as_mut().or(sink.as_mut()) {
        let _ = sink.write_fmt(args);
        return;
    }
    drop(console);

    #[cfg(not(target_os = "none"))]
    std::eprint!("{args}");
}
