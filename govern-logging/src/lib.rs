//! Tracing subscriber bootstrap shared by the govern binaries.
//!
//! Behaviour is driven by environment variables:
//! - `LOG_LEVEL`: default filter directive (`RUST_LOG` overrides it)
//! - `LOG_FORMAT`: `human` (default) or `json`
//! - `LOG_OUTPUT`: `console` (default), `file`, `both` or `none`
//! - `LOG_FILE_PATH`: file written with daily rotation when output includes a file

use std::{
    env,
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::Directive,
    fmt::writer::{BoxMakeWriter, MakeWriterExt},
    prelude::*,
    registry, EnvFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let format = match var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };
        let output = match var("LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            Some("none") => LogOutput::None,
            _ => LogOutput::Console,
        };

        Self {
            level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format,
            output,
            file_path: var("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("govern.log")),
        }
    }

    fn filter(&self) -> EnvFilter {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        ["tokio=warn", "hyper=warn", "sqlx=warn"]
            .into_iter()
            .filter_map(|directive| directive.parse::<Directive>().ok())
            .fold(filter, |filter, directive| filter.add_directive(directive))
    }
}

fn file_writer(path: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(env::temp_dir);
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "govern.log".into());

    tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name))
}

/// Initializes the global tracing subscriber based on environment variables.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env())
}

pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let mut guard = None;

    let writer = match settings.output {
        LogOutput::Console => Some(BoxMakeWriter::new(std::io::stdout)),
        LogOutput::File => {
            let (non_blocking, file_guard) = file_writer(&settings.file_path);
            guard = Some(file_guard);
            Some(BoxMakeWriter::new(non_blocking))
        }
        LogOutput::Both => {
            let (non_blocking, file_guard) = file_writer(&settings.file_path);
            guard = Some(file_guard);
            Some(BoxMakeWriter::new(std::io::stdout.and(non_blocking)))
        }
        LogOutput::None => None,
    };

    let (json_layer, human_layer) = match (writer, settings.format) {
        (Some(writer), LogFormat::Json) => (
            Some(tracing_subscriber::fmt::layer().json().with_writer(writer)),
            None,
        ),
        (Some(writer), LogFormat::Human) => (
            None,
            Some(tracing_subscriber::fmt::layer().pretty().with_writer(writer)),
        ),
        (None, _) => (None, None),
    };

    let result = registry()
        .with(settings.filter())
        .with(json_layer)
        .with(human_layer)
        .try_init();

    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {}", e);
    }

    guard
}
