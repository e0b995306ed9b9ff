pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the standard terminal logger used by the server binaries.
pub fn term_logger(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);

    builder.build().expect("Failed building terminal logger")
}

/// Resolves an optional parent logger into a child, falling back to a
/// discarding root so library code can log unconditionally.
#[inline]
pub fn child_or_discard<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        _ => Logger::root(Discard, o!()),
    }
}

pub use sloggers::types::Severity as Level;
