use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Keeps the JSONL writer alive; buffered lines are flushed when dropped.
pub(crate) struct TracingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Where and how much to log.
#[derive(Debug, Default)]
pub(crate) struct TracingSettings {
    pub verbose: bool,
    /// `RUST_LOG` directives; they override both default levels.
    pub directives: Option<String>,
    /// JSONL trace destination (`PODPOOL_TRACE_FILE`).
    pub trace_file: Option<PathBuf>,
}

impl TracingSettings {
    pub(crate) fn from_env(verbose: bool) -> Self {
        Self {
            verbose,
            directives: std::env::var("RUST_LOG").ok(),
            trace_file: std::env::var_os("PODPOOL_TRACE_FILE").map(PathBuf::from),
        }
    }

    fn filter(&self, default_level: &str) -> EnvFilter {
        self.directives
            .as_deref()
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new(default_level))
    }
}

/// Initialize the global subscriber from the environment.
pub(crate) fn init(verbose: bool) -> TracingGuard {
    let (subscriber, guard) = subscriber(&TracingSettings::from_env(verbose));
    subscriber.init();
    guard
}

/// Build the layered subscriber.
///
/// Layers:
/// 1. Console on stderr (default `info`, or `debug` when `verbose`). Stdout
///    is left to the commands run in pods.
/// 2. JSONL file, only with a trace file, filtered at `debug`.
pub(crate) fn subscriber(
    settings: &TracingSettings,
) -> (impl tracing::Subscriber + Send + Sync + 'static, TracingGuard) {
    let mut guards = Vec::new();
    let default_level = if settings.verbose { "debug" } else { "info" };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(settings.filter(default_level));

    let jsonl_layer = settings.trace_file.as_deref().map(|path| {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let filename = path.file_name().map_or_else(
            || "podpool.jsonl".to_owned(),
            |f| f.to_string_lossy().into_owned(),
        );

        let file_appender = tracing_appender::rolling::never(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        guards.push(guard);

        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_filter(settings.filter("debug"))
    });

    let subscriber = Registry::default().with(console_layer).with(jsonl_layer);
    (subscriber, TracingGuard { _guards: guards })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    fn trace_lines(path: &Path) -> Vec<serde_json::Value> {
        let file = std::fs::File::open(path).unwrap();
        std::io::BufReader::new(file)
            .lines()
            .map(|l| l.unwrap())
            .filter(|l| !l.is_empty())
            .map(|l| {
                serde_json::from_str(&l).unwrap_or_else(|e| panic!("invalid JSON: {e}\nline: {l}"))
            })
            .collect()
    }

    #[test]
    fn trace_file_records_debug_events_with_spans() {
        let dir = tempfile::tempdir().unwrap();
        let trace_file = dir.path().join("podpool.jsonl");
        let (subscriber, guard) = subscriber(&TracingSettings {
            verbose: false,
            directives: None,
            trace_file: Some(trace_file.clone()),
        });

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("attach", app = "podpool-alice");
            let _enter = span.enter();
            tracing::debug!(attempts = 3, "pod not running yet");
            tracing::info!(uuid = "4f2bd4bb", "attaching");
            tracing::trace!("below the trace level");
        });
        drop(guard);

        let lines = trace_lines(&trace_file);
        for line in &lines {
            assert!(line.get("timestamp").is_some(), "missing timestamp");
            assert!(line.get("level").is_some(), "missing level");
        }

        let message = |v: &serde_json::Value| v["fields"]["message"].as_str().map(str::to_owned);
        let debug = lines
            .iter()
            .find(|l| message(l).as_deref() == Some("pod not running yet"))
            .unwrap();
        assert_eq!(debug["level"], "DEBUG");
        assert_eq!(debug["fields"]["attempts"], 3);

        let info = lines
            .iter()
            .find(|l| message(l).as_deref() == Some("attaching"))
            .unwrap();
        assert_eq!(info["fields"]["uuid"], "4f2bd4bb");
        let spans = info["spans"].as_array().unwrap();
        assert_eq!(spans[0]["name"], "attach");
        assert_eq!(spans[0]["app"], "podpool-alice");

        assert!(
            lines.iter().all(|l| l["level"] != "TRACE"),
            "trace events leaked into the file"
        );
    }

    #[test]
    fn directives_override_the_trace_level() {
        let dir = tempfile::tempdir().unwrap();
        let trace_file = dir.path().join("nested").join("trace.jsonl");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let (subscriber, guard) = subscriber(&TracingSettings {
            verbose: true,
            directives: Some("warn".to_owned()),
            trace_file: Some(trace_file.clone()),
        });

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("sweeping");
            tracing::warn!(uuid = "4f2bd4bb", "failed to stop pod");
        });
        drop(guard);

        let lines = trace_lines(&trace_file);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "WARN");
    }

    #[test]
    fn no_trace_file_without_setting() {
        let (subscriber, guard) = subscriber(&TracingSettings::default());
        tracing::subscriber::with_default(subscriber, || tracing::info!("console only"));
        assert!(guard._guards.is_empty());
    }
}
