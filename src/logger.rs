use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str, json: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  let registry = tracing_subscriber::registry().with(filter);

  if json {
    registry.with(fmt::layer().json().with_target(true)).init();
  } else {
    registry.with(fmt::layer().with_target(false)).init();
  }
}
