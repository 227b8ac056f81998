//! Log output that shares stderr with download bars

use std::io::Write;

use indicatif::MultiProgress;

/// Filter used when `RUST_LOG` is unset.
fn default_filter(quiet: bool, debug: bool) -> &'static str {
    match (debug, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    }
}

/// `[LEVEL] message`, or `[LEVEL] module: message` with `debug`.
fn format_line(record: &log::Record, color: bool, debug: bool) -> String {
    let (ansi, label) = match record.level() {
        log::Level::Error => ("\x1b[31m", "ERROR"),
        log::Level::Warn => ("\x1b[33m", "WARN "),
        log::Level::Info => ("\x1b[32m", "INFO "),
        log::Level::Debug | log::Level::Trace => ("\x1b[36m", "DEBUG"),
    };
    let label = if color {
        format!("{ansi}{label}\x1b[0m")
    } else {
        label.to_string()
    };
    if debug {
        format!("[{label}] {}: {}", record.target(), record.args())
    } else {
        format!("[{label}] {}", record.args())
    }
}

/// Routes log lines through `MultiProgress::suspend` so they do not tear
/// active download bars.
struct BarAwareLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
    debug: bool,
}

impl log::Log for BarAwareLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let line = format_line(record, true, self.debug);
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {}
}

/// Initialize logging. `multi` is present only when stderr is a TTY.
///
/// `RUST_LOG` still overrides the computed default level.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let env = env_logger::Env::default().default_filter_or(default_filter(quiet, debug));

    match multi {
        Some(multi) => {
            let inner = env_logger::Builder::from_env(env).build();
            let max_level = inner.filter();
            log::set_boxed_logger(Box::new(BarAwareLogger {
                inner,
                multi: multi.clone(),
                debug,
            }))
            .expect("failed to init logger");
            log::set_max_level(max_level);
        }
        None => {
            env_logger::Builder::from_env(env)
                .format(move |buf, record| writeln!(buf, "{}", format_line(record, false, debug)))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(level: log::Level, color: bool, debug: bool) -> String {
        format_line(
            &log::Record::builder()
                .level(level)
                .target("basejmpr_store::reconcile")
                .args(format_args!("vm1.img is detached"))
                .build(),
            color,
            debug,
        )
    }

    #[test]
    fn default_filter_levels() {
        assert_eq!(default_filter(false, false), "info");
        assert_eq!(default_filter(true, false), "warn");
        assert_eq!(default_filter(true, true), "debug");
    }

    #[test]
    fn plain_line_has_no_ansi() {
        assert_eq!(render(log::Level::Warn, false, false), "[WARN ] vm1.img is detached");
    }

    #[test]
    fn debug_line_names_module() {
        assert_eq!(
            render(log::Level::Debug, false, true),
            "[DEBUG] basejmpr_store::reconcile: vm1.img is detached"
        );
    }

    #[test]
    fn colored_label_resets() {
        assert_eq!(
            render(log::Level::Error, true, false),
            "[\x1b[31mERROR\x1b[0m] vm1.img is detached"
        );
    }
}
