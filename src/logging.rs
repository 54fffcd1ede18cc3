use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const QUIET_DEPENDENCIES: &[&str] = &["hyper", "reqwest", "tokio_postgres", "redis"];

/// `RUST_LOG` wins when set; otherwise `level` for everything, with chatty
/// dependencies held at `warn`.
pub fn filter(level: &str) -> Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::try_from_default_env()
            .map_err(|e| Error::config(format!("invalid RUST_LOG: {e}")));
    }

    let level: tracing::Level = level
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid log level: {level:?}")))?;
    let directives = std::iter::once(level.to_string().to_lowercase())
        .chain(QUIET_DEPENDENCIES.iter().map(|dep| format!("{dep}=warn")))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(&directives).map_err(|e| Error::config(format!("log filter: {e}")))
}

/// Install the global subscriber: stdout, plus `file` when given.
pub fn init(level: &str, file: Option<&Path>) -> Result<()> {
    let filter = filter(level)?;

    let file_layer = match file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let f = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(f)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::config(format!("logging already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_validated() {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return;
        }
        assert!(filter("debug").is_ok());
        assert!(filter("INFO").is_ok());
        assert!(matches!(filter("loud"), Err(Error::Config(_))));
    }

    #[test]
    fn dependencies_are_capped() {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return;
        }
        let rendered = filter("trace").unwrap().to_string();
        assert!(rendered.contains("hyper=warn"));
        assert!(rendered.contains("redis=warn"));
    }
}
