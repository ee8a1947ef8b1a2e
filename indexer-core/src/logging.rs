use slog::{o, Drain, Logger};
use slog_async::Async;
use slog_envlogger::LogBuilder;
use slog_scope::GlobalLoggerGuard;
use slog_term::{FullFormat, TermDecorator};

/// The channel size for async logging.
const BUFFER_SIZE: usize = 1024;

/// Initializes logging for a binary: terminal output behind an env-style
/// filter, with the `log` macros used throughout the library bridged onto the
/// global slog logger.
pub fn init(filter: impl AsRef<str>) -> (Logger, GlobalLoggerGuard) {
    let format = FullFormat::new(TermDecorator::new().stdout().build())
        .use_utc_timestamp()
        .build()
        .fuse();
    let drain = Async::new(LogBuilder::new(format).parse(filter.as_ref()).build())
        .chan_size(BUFFER_SIZE)
        .build();
    let logger = Logger::root(drain.fuse(), o!());

    let guard = slog_scope::set_global_logger(logger.clone());
    slog_stdlog::init().expect("failed to register logger");

    (logger, guard)
}
