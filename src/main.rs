use std::sync::Arc;
use std::time::*;
use pretty_toa::ThousandsSep;
use structopt::StructOpt;
use tokio::runtime::Runtime;
use tracing::info;
use gymkeeper::advice::ChatCompletionClient;
use gymkeeper::cache::{Clock, SuggestionCache, SystemClock};
use gymkeeper::config::Config;
use gymkeeper::db::DataBase;
use gymkeeper::routes::{self, AppState};
use gymkeeper::seed;
use gymkeeper::store::{MemoryStore, Store};
use gymkeeper::suggestions::SuggestionService;
use gymkeeper::workouts::WorkoutService;

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let run_start = Instant::now();
    dotenv::dotenv().ok();
    let config = Config::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.as_str())
        .init();

    let rt = Runtime::new()?;

    rt.block_on(async {
        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => {
                info!("connecting to postgres");
                Arc::new(DataBase::new(url).await?)
            }
            None => {
                info!("DATABASE_URL not set, using in-memory store");
                Arc::new(MemoryStore::default())
            }
        };

        seed::seed_exercises(store.as_ref()).await?;
        seed::seed_admin(store.as_ref()).await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = SuggestionCache::new(clock.clone());
        let advice = ChatCompletionClient::new(
            config.advice_api_url.clone(),
            config.advice_api_key.clone(),
            config.advice_model.clone(),
            config.advice_timeout(),
        )?;

        let state = AppState::new(
            store.clone(),
            clock.clone(),
            WorkoutService::new(store.clone(), cache.clone(), clock.clone()),
            SuggestionService::new(store.clone(), cache, clock, Arc::new(advice))
                .with_windows(config.suggestion_history_days, config.weekly_window_days),
        );

        info!(
            n_users = %store.count_users().await?.thousands_sep(),
            n_exercises = %store.list_exercises().await?.len().thousands_sep(),
            n_workouts = %store.count_workouts().await?.thousands_sep(),
            elapsed = ?(Instant::now() - run_start),
            addr = %config.bind_addr,
            "gymkeeper-server starting",
        );

        warp::serve(routes::routes(state)).run(config.bind_addr).await;

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("fatal: {}", e);
        std::process::exit(1);
    }
}
