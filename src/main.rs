//! PUNTER — automated wagering decision & risk-control engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores per-account state from disk (or creates fresh), then runs
//! one independent pipeline per account, fed by that account's JSONL
//! event stream, with graceful shutdown on Ctrl+C.

use anyhow::Result;
use futures::future::join_all;
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

use punter::config::AppConfig;
use punter::engine::{AccountPipeline, PipelineSettings};
use punter::feed::GameEvent;
use punter::llm::openai_compat::OpenAiCompatGateway;
use punter::llm::ModelGateway;
use punter::notify::webhook::WebhookNotifier;
use punter::notify::{LogNotifier, Notifier};
use punter::platform::{PaperPlacer, StakePlacer};
use punter::state::AccountState;
use punter::storage;

const BANNER: &str = r#"
 ____  _   _ _   _ _____ _____ ____
|  _ \| | | | \ | |_   _| ____|  _ \
| |_) | | | |  \| | | | |  _| | |_) |
|  __/| |_| | |\  | | | | |___|  _ <
|_|    \___/|_| \_| |_| |_____|_| \_\

  Automated Wagering Decision & Risk-Control Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        accounts = cfg.accounts.len(),
        model = %cfg.llm.model,
        endpoint = %cfg.llm.endpoint,
        "PUNTER starting up"
    );

    // -- Shared collaborators ---------------------------------------------

    let api_key = std::env::var(&cfg.llm.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        warn!(
            env = %cfg.llm.api_key_env,
            "No gateway API key configured; predictions will use the statistical fallback"
        );
    }
    let gateway: Arc<dyn ModelGateway> = Arc::new(OpenAiCompatGateway::new(
        cfg.llm.endpoint.clone(),
        SecretString::new(api_key),
    )?);

    // Paper placement until a live transport adapter is wired in.
    let placer: Arc<dyn StakePlacer> = Arc::new(PaperPlacer);

    // -- Per-account pipelines --------------------------------------------

    let mut tasks = Vec::new();
    for account in &cfg.accounts {
        // A broken account is skipped; the rest keep running.
        if let Err(e) = account.validate() {
            error!(account = %account.name, error = %e, "Account misconfigured, skipped");
            continue;
        }

        let notifier: Arc<dyn Notifier> = match &cfg.notify.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone(), account.name.clone())?),
            None => Arc::new(LogNotifier),
        };

        let model_id = account.model_id(&cfg.llm.model);
        let state_path = cfg.state_path(account);
        let state = match storage::load_state(&state_path)? {
            Some(s) => s,
            None => {
                let mut s = AccountState::new(account.fund, account.preset.clone(), model_id);
                if let Some(n) = account.warning_threshold {
                    s.counters.warning_threshold = n.max(1);
                }
                s
            }
        };

        info!(
            account = %account.name,
            channel = %account.channel,
            fund = state.counters.fund,
            preset = %state.counters.preset,
            "Account pipeline ready"
        );

        let settings = PipelineSettings::new(
            account.name.clone(),
            state_path,
            cfg.decisions_path(account),
        );
        let pipeline = Arc::new(AccountPipeline::new(
            settings,
            state,
            Arc::clone(&gateway),
            Arc::clone(&placer),
            notifier,
        ));

        tasks.push(tokio::spawn(run_account(
            account.name.clone(),
            pipeline,
            cfg.events_path(account),
        )));
    }

    if tasks.is_empty() {
        warn!("No runnable accounts configured, exiting");
        return Ok(());
    }

    // -- Run until all streams drain or shutdown is requested -------------

    let all = join_all(tasks);
    tokio::pin!(all);
    tokio::select! {
        _ = &mut all => {
            info!("All account event streams drained");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("PUNTER shut down cleanly");
    Ok(())
}

/// Feed one account's pipeline from its JSONL event stream. Unparseable
/// lines are skipped with a warning; the pipeline itself never lets an
/// event error escape.
async fn run_account(name: String, pipeline: Arc<AccountPipeline>, events_path: PathBuf) {
    let file = match tokio::fs::File::open(&events_path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(
                account = %name,
                path = %events_path.display(),
                error = %e,
                "No event stream for account"
            );
            return;
        }
    };

    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut processed = 0u64;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<GameEvent>(line) {
                    Ok(event) => {
                        pipeline.handle(event).await;
                        processed += 1;
                    }
                    Err(e) => {
                        warn!(account = %name, error = %e, "Unparseable event line, skipped");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!(account = %name, error = %e, "Event stream read failed");
                break;
            }
        }
    }

    info!(account = %name, processed, "Event stream drained");
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("punter=info"));

    let json_logging = std::env::var("PUNTER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
