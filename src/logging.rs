//! Per-run logging context.
//!
//! Nothing is installed globally. A [`LogContext`] owns a `tracing`
//! dispatcher and [`LogContext::run`] makes it the default only for the
//! duration of one conversion.

use std::fmt;
use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;

const PROGRAM: &str = "bmap2simg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    #[default]
    Normal,
    /// Everything, with source locations.
    Debug,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }

    fn level(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::WARN,
            Verbosity::Normal => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::DEBUG,
        }
    }
}

/// `bmap2simg: info: message key=value` lines with colored level names on
/// terminals. In debug mode, debug events are prefixed with a timestamp and
/// `[file,line]`.
struct LineFormat {
    locations: bool,
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let (name, color) = match *meta.level() {
            Level::ERROR => ("ERROR", Some("\x1b[91m")),
            Level::WARN => ("WARNING", Some("\x1b[93m")),
            Level::INFO => ("info", None),
            Level::DEBUG => ("debug", None),
            Level::TRACE => ("trace", None),
        };
        if self.locations && *meta.level() >= Level::DEBUG {
            let ansi = writer.has_ansi_escapes();
            write!(writer, "[")?;
            if ansi {
                write!(writer, "\x1b[92m")?;
            }
            SystemTime.format_time(&mut writer)?;
            if ansi {
                write!(writer, "\x1b[0m")?;
            }
            write!(writer, "] ")?;
            if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
                write!(writer, "[{file},{line}] ")?;
            }
        }
        write!(writer, "{PROGRAM}: ")?;
        match color {
            Some(code) if writer.has_ansi_escapes() => write!(writer, "{code}{name}\x1b[0m: ")?,
            _ => write!(writer, "{name}: ")?,
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

pub struct LogContext {
    dispatch: Dispatch,
    verbosity: Verbosity,
}

impl LogContext {
    /// Log to standard error.
    pub fn new(verbosity: Verbosity) -> Self {
        let ansi = std::io::stderr().is_terminal();
        Self::with_writer(verbosity, std::io::stderr, ansi)
    }

    pub fn with_writer<W>(verbosity: Verbosity, make_writer: W, ansi: bool) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(make_writer)
            .with_max_level(verbosity.level())
            .with_ansi(ansi)
            .event_format(LineFormat {
                locations: verbosity == Verbosity::Debug,
            })
            .finish();
        Self {
            dispatch: Dispatch::new(subscriber),
            verbosity,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Run `f` with this context as the default dispatcher.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture(verbosity: Verbosity) -> (LogContext, Captured) {
        let out = Captured::default();
        let writer = out.clone();
        (
            LogContext::with_writer(verbosity, move || writer.clone(), false),
            out,
        )
    }

    #[test]
    fn normal_hides_debug() {
        let (ctx, out) = capture(Verbosity::Normal);
        ctx.run(|| {
            tracing::debug!("hidden");
            tracing::info!(blocks = 4, "shown");
        });
        let text = out.text();
        assert!(!text.contains("hidden"));
        assert!(text.contains("bmap2simg: info: shown blocks=4"));
    }

    #[test]
    fn quiet_keeps_warnings() {
        let (ctx, out) = capture(Verbosity::Quiet);
        ctx.run(|| {
            tracing::info!("chatty");
            tracing::warn!("careful");
        });
        let text = out.text();
        assert!(!text.contains("chatty"));
        assert!(text.contains("bmap2simg: WARNING: careful"));
    }

    #[test]
    fn debug_adds_locations() {
        let (ctx, out) = capture(Verbosity::Debug);
        ctx.run(|| tracing::debug!("detail"));
        let text = out.text();
        assert!(text.starts_with('['));
        assert!(text.contains("] ["));
        assert!(text.contains("logging.rs,"));
        assert!(text.contains("] bmap2simg: debug: detail"));
    }

    #[test]
    fn debug_prefix_only_on_debug_events() {
        let (ctx, out) = capture(Verbosity::Debug);
        ctx.run(|| tracing::info!("plain"));
        assert_eq!(out.text(), "bmap2simg: info: plain\n");
    }

    #[test]
    fn context_is_scoped_to_run() {
        let (ctx, out) = capture(Verbosity::Normal);
        ctx.run(|| tracing::info!("inside"));
        tracing::info!("outside");
        let text = out.text();
        assert!(text.contains("inside"));
        assert!(!text.contains("outside"));
    }

    #[test]
    fn flags_map_to_verbosity() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }
}
