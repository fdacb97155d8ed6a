//! Binary entry point: read the config, start logging, connect the backend,
//! hydrate the store and drive the Ratatui event loop until the user exits.
use std::sync::Arc;

use anyhow::Context;
use music_board::{backend, logging, run_app, App, AppConfig, DataAccessClient, MusicBoardStore};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    let _log_guard = logging::init_logging(&config.log_dir()?, config.log_filter.as_deref())?;
    info!("starting music board");

    let backend = backend::connect(&config.backend).context("failed to connect backend")?;
    let client = Arc::new(DataAccessClient::new(backend));
    let auth = client.init_auth();

    let mut store = MusicBoardStore::new(Arc::clone(&client));
    let report = store.load_all_data().await;
    if let Some(error) = &report.error {
        warn!(error = %error, "starting with incomplete data");
    }

    let mut app = App::new(store);
    let result = run_app(&mut app).await;

    auth.unsubscribe();
    info!("music board stopped");
    result
}
