use std::io;
use std::sync::Once;

use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::config::{TRACE_LEVEL_DEBUG, TRACE_LEVEL_TRACE};

static INIT: Once = Once::new();

/// Process wide tracing setup. Initialization happens once; later calls
/// keep the first configuration.
#[derive(Debug, Clone, Default)]
pub struct TracingFactory {
    options: TracingFactoryOptions,
}

#[derive(Debug, Clone)]
pub struct TracingFactoryOptions {
    debug: bool,

    output_type: OutputType,

    level: Level,

    log_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OutputType {
    Stdout,

    /// Daily rolling log file, mirrored to stdout.
    RollingFile,
}

impl TracingFactory {
    pub fn init_log(debug: bool) -> Self {
        TracingFactory::init_log_with_options(TracingFactoryOptions::new_with_debug(debug))
    }

    /// Map a configured trace level onto a tracing setup.
    pub fn init_for_trace_level(trace_level: u32) -> Self {
        let debug = trace_level & TRACE_LEVEL_DEBUG == TRACE_LEVEL_DEBUG;
        let level = if debug {
            Level::DEBUG
        } else if trace_level & TRACE_LEVEL_TRACE != 0 {
            Level::INFO
        } else {
            Level::WARN
        };
        TracingFactory::init_log_with_options(TracingFactoryOptions {
            debug,
            output_type: OutputType::Stdout,
            level,
            log_dir: None,
        })
    }

    pub fn init_log_with_options(opts: TracingFactoryOptions) -> Self {
        INIT.call_once(|| {
            let format = fmt::format()
                .with_file(true)
                .with_line_number(false)
                .with_target(false)
                .with_thread_ids(true)
                .with_thread_names(true)
                .compact();

            match opts.output_type {
                OutputType::Stdout => {
                    let _ = tracing_subscriber::fmt()
                        .with_max_level(opts.level)
                        .event_format(format)
                        .try_init();
                }
                OutputType::RollingFile => {
                    let dir = opts
                        .log_dir
                        .clone()
                        .unwrap_or_else(|| String::from("/tmp/tbr/logs"));
                    let file_appender = rolling::daily(dir, "replication.log");
                    let merge = file_appender.and(io::stdout);

                    let _ = tracing_subscriber::fmt()
                        .with_max_level(opts.level)
                        .event_format(format)
                        .with_writer(merge)
                        .try_init();
                }
            };
        });

        TracingFactory { options: opts }
    }

    pub fn get_log_dir(&self) -> &str {
        match self.options.log_dir.as_ref() {
            None => "",
            Some(dir) => dir.as_str(),
        }
    }
}

impl Default for TracingFactoryOptions {
    fn default() -> Self {
        TracingFactoryOptions::new_with_debug(false)
    }
}

impl TracingFactoryOptions {
    pub fn new_with_debug(debug: bool) -> Self {
        TracingFactoryOptions::new(debug, OutputType::Stdout, None)
    }

    pub fn new(debug: bool, output_type: OutputType, log_dir: Option<String>) -> Self {
        let level = if debug { Level::DEBUG } else { Level::INFO };

        TracingFactoryOptions {
            debug,
            output_type,
            level,
            log_dir,
        }
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}
