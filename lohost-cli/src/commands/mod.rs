pub mod daemon;
pub mod list;
pub mod run;

use std::future::Future;

use anyhow::{Context, Result};

/// Drive a client-side future on a single-threaded runtime.
///
/// Client commands log at `warn` unless `RUST_LOG` says otherwise, so the
/// wrapped process keeps the terminal.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    lohost_daemon::init_tracing("warn");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    Ok(runtime.block_on(future))
}
