use tracing_subscriber::{
  EnvFilter,
  fmt::{self, time::LocalTime},
  prelude::*,
};

use crate::configs::LoggingConfig;

fn filter_directives(config: Option<&LoggingConfig>) -> String {
  let log_level = config
    .and_then(|l| l.level.as_deref())
    .unwrap_or("info");

  let filters = config
    .and_then(|l| l.filters.as_deref())
    .unwrap_or("");

  if filters.is_empty() {
    log_level.to_string()
  } else {
    format!("{},{}", log_level, filters)
  }
}

/// Installs the global subscriber. Logs go to stderr; `RUST_LOG` overrides the
/// configured level and filters. Calling this twice is a no-op.
pub fn init(config: Option<&LoggingConfig>) {
  let env_filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_timer(LocalTime::rfc_3339())
    .with_target(true)
    .with_thread_names(true)
    .with_line_number(true)
    .with_file(false);

  let _ = tracing_subscriber::registry()
    .with(env_filter)
    .with(stderr_layer)
    .try_init();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn directives_combine_level_and_filters() {
    let config = LoggingConfig {
      level: Some("debug".into()),
      filters: Some("reqwest=warn".into()),
    };
    assert_eq!(filter_directives(Some(&config)), "debug,reqwest=warn");
    assert_eq!(filter_directives(None), "info");
  }
}
