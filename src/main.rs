use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use iced::{Application, Settings};
use log::info;

use calc_chat::app::{App, Flags};
use calc_chat::backend::SupabaseBackend;
use calc_chat::config::AppConfig;
use calc_chat::local_store::LocalStore;
use calc_chat::messenger::Messenger;
use calc_chat::tenor::TenorClient;

fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env()?;
    info!("Using backend {}", config.supabase_url);

    let store = LocalStore::new(&config.db_path)?;
    let tenor = TenorClient::new(config.tenor_api_key.clone(), config.http_timeout_ms)?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()?;
    let realtime_url = config.realtime_url();
    let backend = SupabaseBackend::new(config)?;

    let flags = Flags {
        messenger: Messenger::new(Arc::new(backend), store),
        tenor,
        realtime_url,
        http,
    };
    App::run(Settings::with_flags(flags))?;
    Ok(())
}
