use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use appvirt::{Engine, EngineConfig};

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config_path = std::env::var("APPVIRT_CONFIG").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("appvirt.json"));
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config = EngineConfig::load(&config_path)?.apply_env();
    info!(
        target: "appvirt",
        "appvirt starting: RUST_LOG='{}', config='{}', virtual_root='{}', database_dir='{}'",
        rust_log,
        config_path.display(),
        config.virtual_root.display(),
        config.database_dir.display()
    );

    let engine = Engine::open(EngineConfig { auto_flush: false, ..config })?;
    let loaded = engine.load_all()?;
    info!(target: "appvirt", "file table: {} entries", loaded.files);
    for entry in engine.files().entries() {
        info!(target: "appvirt", "  {} -> {}", entry.key, engine.file_host_path(&entry).display());
    }
    info!(target: "appvirt", "registry: {} virtual keys", loaded.keys);
    let report = engine.flush_all();
    info!(target: "appvirt", "flushed fs={} registry={}", report.filesystem, report.registry);
    Ok(())
}
