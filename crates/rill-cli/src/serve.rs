//! Serve command implementation.

use std::sync::Arc;

use rill_core::auth::InsecureBroker;
use rill_core::store::FileStore;
use rill_server::ServerConfig;

/// Start the notebook server over a file-backed store.
pub async fn execute(data_dir: &str, host: String, port: u16) -> anyhow::Result<()> {
    let store = Arc::new(FileStore::new(data_dir)?);
    let auth = Arc::new(InsecureBroker::new());

    let config = ServerConfig { host, port };
    println!("Rill notebook server");
    println!("  notebooks: {data_dir}");
    println!("  http:      http://{}:{}", config.host, config.port);
    println!("  ws:        ws://{}:{}/ws/<notebook>", config.host, config.port);
    println!("Press Ctrl+C to stop");

    rill_server::serve(config, store, auth).await?;
    Ok(())
}
