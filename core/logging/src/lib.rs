//! `tracing` subscriber setup and the `timeit!` timing macro, split out of
//! the CLI binary so every crate that wants to time a phase (schema
//! reconciliation, a catalog flush, a migration) can pull in `logging`
//! rather than reimplementing the registry/layer/filter dance.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `verbose` raises the default
/// filter floor from `info` to `debug`; `RUST_LOG` always wins when set.
pub fn init(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_thread_names(false)
                .with_line_number(false)
                .with_file(false)
                .with_span_events(fmt::format::FmtSpan::NONE)
                .compact(),
        )
        .with(filter)
        .init();
}

/// Times a block and logs its label and elapsed duration at `info` level.
#[macro_export]
macro_rules! timeit {
    ($label:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let res = { $block };
        let elapsed = start.elapsed();
        tracing::info!("{} in {:.2?}", $label, elapsed);
        res
    }};
}
