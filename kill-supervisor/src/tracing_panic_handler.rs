use backtrace::Backtrace;
use std::fmt::{self, Display};

/// Reports panics as `tracing` error events so they reach the json log instead of raw stderr text.
pub fn setup() {
    std::panic::set_hook(Box::new(|panic| {
        let backtrace = BacktraceFormatter(Backtrace::new());
        if let Some(location) = panic.location() {
            tracing::error!(
                message = %panic,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
                panic.backtrace = %backtrace,
            );
        } else {
            tracing::error!(message = %panic, panic.backtrace = %backtrace);
        }
    }));
}

/// Only the frames belonging to the application, without the std panic machinery and runtime startup.
struct BacktraceFormatter(Backtrace);

impl Display for BacktraceFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "backtrace:")?;
        for (frame, symbols) in backtrace_ext::short_frames_strict(&self.0) {
            for symbol in &frame.symbols()[symbols] {
                match symbol.name() {
                    Some(name) => writeln!(f, "  {name:#}")?,
                    None => writeln!(f, "  <unknown>")?,
                }
                if let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) {
                    writeln!(f, "      at {}:{line}", file.display())?;
                }
            }
        }
        Ok(())
    }
}
