//! Console-backed logging
//!
//! The `log` facade routes through a function-pointer sink installed at
//! startup, after the console is up but before discovery runs. The sink
//! indirection keeps the logger free of borrows into the firmware
//! layer; swap the sink, not the logger.

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Receives one fully formatted log line, terminated by the caller.
pub type LogSink = fn(core::fmt::Arguments<'_>);

static SINK: Mutex<Option<LogSink>> = Mutex::new(None);
static LOGGER: ConsoleLogger = ConsoleLogger;

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let sink = *SINK.lock();
        if let Some(sink) = sink {
            sink(format_args!("{:>5}: {}\r\n", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Install the sink and activate the facade. Safe to call more than
/// once; later calls only replace the sink and the level.
pub fn init(sink: LogSink, level: LevelFilter) {
    *SINK.lock() = Some(sink);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// The level for this build: verbose builds trace, the rest stay at
/// info so the boot screen is not scrolled away.
pub fn default_level() -> LevelFilter {
    if cfg!(feature = "verbose_logging") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
