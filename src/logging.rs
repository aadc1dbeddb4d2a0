use colored::Colorize;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Compact event formatter for the runtime's diagnostics.
///
/// Each line carries a colored three-letter level tag, the emitting module
/// target, and the event fields. Runtime events identify their endpoints
/// through ordinary `service` / `link` fields (rendered via the id types'
/// `Display`), so a grep for `link:1025` follows one endpoint through a log
/// without span plumbing.
pub struct RuntimeFormatter;

impl<S, N> FormatEvent<S, N> for RuntimeFormatter
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
        let tag = match *meta.level() {
            Level::ERROR => "ERR".red().bold(),
            Level::WARN => "WRN".yellow(),
            Level::INFO => "INF".green(),
            Level::DEBUG => "DBG".blue(),
            Level::TRACE => "TRC".purple().dimmed(),
        };

        write!(writer, "{} {} ", tag, meta.target().dimmed())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install a [`RuntimeFormatter`] subscriber honoring `RUST_LOG`, for demos
/// and tests.
///
/// Safe to call more than once; only the first call installs the subscriber.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(RuntimeFormatter)
        .try_init();
}
