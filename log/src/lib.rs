//! Synchronous logging for small Unix daemons, inspired by OpenBSD's
//! `log.c`.
//!
//! A daemon logs to syslog by default and to stderr when it runs in
//! the foreground.  The log level is selected by the [`Config`] or
//! overridden with a `RUST_LOG`-style filter string.

mod filter;

use derive_more::{Display, From};
use libc::openlog;
use slog::{Drain, Level, OwnedKVList, Record, KV};
use slog_scope::GlobalLoggerGuard;
use std::{
    ffi::{CStr, CString},
    fmt,
    io::{self, Write},
    pin::Pin,
    sync::{Mutex, Once},
};

/// Re-export the scoped logging macros.
pub use slog_scope::{debug, error, info, trace, warn};

static LOG_BRIDGE: Once = Once::new();

/// Options for the global logger.
#[derive(Debug, Default)]
pub struct Config {
    /// Log to stderr instead of syslog.
    pub foreground: bool,
    /// Lower the default log level from `info` to `debug`.
    pub verbose: bool,
}

/// Logging errors.
#[derive(Debug, Display, From)]
pub enum Error {
    #[display(fmt = "{}", "_0")]
    NulError(std::ffi::NulError),
    #[display(fmt = "{}", "_0")]
    IoError(io::Error),
}

impl std::error::Error for Error {}

/// Set up the global logger for the current process.
///
/// The returned guard must be kept alive for the lifetime of the
/// process; dropping it resets the global logger.
pub fn init(name: &str, config: &Config) -> Result<GlobalLoggerGuard, Error> {
    let drain: Box<dyn Drain<Err = slog::Never, Ok = ()> + Send> = if config.foreground {
        Box::new(Stderr::new(name).fuse())
    } else {
        Box::new(Syslog::new(name)?.fuse())
    };

    let default_filter = if config.verbose { "debug" } else { "info" };
    let drain = filter::Filter::from_env(drain, default_filter);

    // The `Mutex` makes the drain `UnwindSafe`.
    let drain = Mutex::new(drain.fuse());
    let logger = slog::Logger::root(drain.fuse(), slog::o!()).into_erased();

    let guard = slog_scope::set_global_logger(logger);
    LOG_BRIDGE.call_once(|| {
        slog_stdlog::init().unwrap();
    });

    Ok(guard)
}

/// Foreground target that writes to stderr.
struct Stderr {
    name: String,
}

impl Stderr {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Drain for Stderr {
    type Ok = ();
    type Err = Error;

    fn log(&self, record: &Record<'_>, values: &OwnedKVList) -> Result<Self::Ok, Self::Err> {
        let message = format!("{}: {}\n", self.name, format_record(record, values));
        io::stderr()
            .write_all(message.as_bytes())
            .map_err(Into::into)
    }
}

/// Background target that writes to syslog.
struct Syslog {
    /// The syslog ident has to outlive the `openlog` registration.
    _name: Pin<CString>,
}

impl Syslog {
    fn new(name: &str) -> Result<Self, Error> {
        let _name = CString::new(name)?;
        let c_str: &CStr = _name.as_c_str();

        unsafe {
            openlog(
                c_str.as_ptr(),
                libc::LOG_PID | libc::LOG_NDELAY,
                libc::LOG_DAEMON,
            )
        };

        Ok(Self {
            _name: Pin::new(_name),
        })
    }
}

impl Drain for Syslog {
    type Ok = ();
    type Err = Error;

    fn log(&self, record: &Record<'_>, values: &OwnedKVList) -> Result<Self::Ok, Self::Err> {
        let c_message = CString::new(format_record(record, values).into_bytes())?;

        let priority = match record.level() {
            Level::Critical => libc::LOG_CRIT,
            Level::Error => libc::LOG_ERR,
            Level::Warning => libc::LOG_WARNING,
            Level::Info => libc::LOG_INFO,
            Level::Debug | Level::Trace => libc::LOG_DEBUG,
        };

        unsafe {
            libc::syslog(priority, c_message.as_c_str().as_ptr());
        }

        Ok(())
    }
}

impl Drop for Syslog {
    fn drop(&mut self) {
        unsafe {
            libc::closelog();
        }
    }
}

/// Format a record and its key-value pairs into a single line.
fn format_record(record: &Record<'_>, values: &OwnedKVList) -> String {
    let mut serializer = Serializer::new(record);
    let _ = record.kv().serialize(record, &mut serializer);
    let _ = values.serialize(record, &mut serializer);
    serializer.buf
}

struct Serializer {
    buf: String,
}

impl Serializer {
    fn new(record: &Record<'_>) -> Self {
        let mut buf = format!("{}", record.msg());

        if record.level() >= Level::Debug {
            buf.push_str(&format!(
                ", source: {}:{}, module: {}",
                record.file(),
                record.line(),
                record.module()
            ));
        }

        Self { buf }
    }
}

impl slog::Serializer for Serializer {
    fn emit_arguments(&mut self, key: &str, val: &fmt::Arguments<'_>) -> slog::Result {
        self.buf.push_str(&format!(", {}: {}", key, val));
        Ok(())
    }
}
