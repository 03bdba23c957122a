use tracing_subscriber::EnvFilter;

/// tracing subscriber を初期化する
///
/// フィルタは `RUST_LOG`（省略時 `info`）。debug ビルドは人間向けの行、
/// release ビルドは JSON を stderr に出す。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    }
}
