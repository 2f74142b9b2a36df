// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use smithers_core::{ObsLevel, ObservabilityHandle};
use smithers_model::catalog::ModelCatalogEntry;
use smithers_tui::{App, AppOptions};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // TUI mode writing to stderr corrupts the ratatui display; suppress all
    // tracing output there unless the caller opts in via SMITHERS_DEBUG_LEVEL.
    let is_tui = cli.command.is_none();
    let observability = init_logging(cli.verbose, is_tui);
    install_crash_dump_hook(observability.clone());

    if let Some(cmd) = &cli.command {
        return match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                Ok(())
            }
            Commands::ShowConfig => {
                let config = smithers_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                Ok(())
            }
            Commands::ListModels {
                provider,
                refresh,
                json,
            } => {
                let config = smithers_config::load(cli.config.as_deref())?;
                list_models_cmd(&config, provider.as_deref(), *refresh, *json).await
            }
            Commands::ListProviders { verbose, json } => list_providers_cmd(*verbose, *json),
            Commands::Run { prompt, model } => {
                let config = Arc::new(smithers_config::load(cli.config.as_deref())?);
                run_headless(config, prompt.clone(), model.clone()).await
            }
        };
    }

    let config = Arc::new(smithers_config::load(cli.config.as_deref())?);
    run_tui(cli, config).await
}

/// List available models, optionally querying the provider API for live data.
async fn list_models_cmd(
    config: &smithers_config::Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    if let Some(prov) = provider_filter {
        if smithers_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `smithers list-providers` for details):");
            for d in smithers_model::list_drivers() {
                eprintln!("  {:20} {}", d.id, d.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let entries: Vec<ModelCatalogEntry> = if refresh {
        let model_cfg = if let Some(prov) = provider_filter {
            let mut c = config.model.clone();
            c.provider = prov.to_string();
            c
        } else {
            config.model.clone()
        };
        let model = smithers_model::from_config(&model_cfg)?;
        let mut live = model.list_models().await?;
        if let Some(prov) = provider_filter {
            live.retain(|e| e.provider == prov);
        }
        live
    } else {
        let mut all = smithers_model::catalog::static_catalog();
        if let Some(prov) = provider_filter {
            all.retain(|e| e.provider == prov);
        }
        all.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));
        all
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries
        .iter()
        .map(|e| e.provider.len())
        .max()
        .unwrap_or(8)
        .max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  DESCRIPTION",
        "ID",
        "PROVIDER",
        "CTX WINDOW",
        "MAX OUT TOKENS",
        id_w = id_w,
        prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 50));

    for e in &entries {
        let ctx = if e.context_window == 0 {
            "  -".to_string()
        } else {
            format!("{:>12}", e.context_window)
        };
        let max_out = if e.max_output_tokens == 0 {
            "  -".to_string()
        } else {
            format!("{:>16}", e.max_output_tokens)
        };
        println!(
            "{:<id_w$}  {:<prov_w$}  {}  {}  {}",
            e.id,
            e.provider,
            ctx,
            max_out,
            e.description,
            id_w = id_w,
            prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

/// List all registered model providers.
fn list_providers_cmd(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = smithers_model::list_drivers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
        }
        let rows: Vec<ProviderJson> = drivers
            .iter()
            .map(|d| ProviderJson {
                id: d.id,
                name: d.name,
                description: d.description,
                default_api_key_env: d.default_api_key_env,
                default_base_url: d.default_base_url,
                requires_api_key: d.requires_api_key,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", drivers.len());

    if verbose {
        for d in drivers {
            println!("  {} — {}", d.id, d.name);
            println!("    {}", d.description);
            if let Some(env) = d.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = d.default_base_url {
                println!("    Default URL : {url}");
            }
            if !d.requires_api_key {
                println!("    Auth        : none required");
            }
            println!();
        }
    } else {
        let id_w = drivers.iter().map(|d| d.id.len()).max().unwrap_or(10).max(10);
        let name_w = drivers
            .iter()
            .map(|d| d.name.len())
            .max()
            .unwrap_or(8)
            .max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for d in drivers {
            println!("{:<id_w$}  {:<name_w$}  {}", d.id, d.name, d.description);
        }
        println!("\nUse `smithers list-providers --verbose` for API key and URL details.");
        println!("Use `smithers list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
}

async fn run_tui(cli: Cli, config: Arc<smithers_config::Config>) -> anyhow::Result<()> {
    use ratatui::crossterm::{
        event::{DisableMouseCapture, EnableMouseCapture},
        execute,
        terminal::{disable_raw_mode, LeaveAlternateScreen},
    };

    // A panic while in raw-mode / alternate-screen would otherwise leave the
    // terminal permanently garbled.
    {
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = disable_raw_mode();
            let _ = execute!(std::io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
            original_hook(info);
        }));
    }

    let terminal = ratatui::init();
    let _ = execute!(std::io::stdout(), EnableMouseCapture);

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv()  => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        let _ = disable_raw_mode();
        let _ = execute!(std::io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        std::process::exit(1);
    });

    let opts = AppOptions {
        mode: cli.mode,
        initial_prompt: cli.prompt,
        initial_history: None,
        model_override: cli.model,
        initial_queue: Vec::new(),
        store_path: default_store_path(),
    };

    let app = App::new(config, opts);
    let result = app.run(terminal).await;

    let _ = execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();

    result
}

/// Non-interactive front end: submit one prompt to the same coordination
/// worker and durable store the TUI uses, wait for the turn to settle, and
/// print the assistant's reply. Crash recovery and the ephemeral-message
/// purge run first, exactly as `Persistence::open` does for the TUI.
async fn run_headless(
    config: Arc<smithers_config::Config>,
    prompt: String,
    model_override: Option<String>,
) -> anyhow::Result<()> {
    use smithers_bootstrap::{AgentBuilder, RuntimeContext};
    use smithers_store::{RunStatus, Store};
    use smithers_worker::{recover_session, Worker};

    let model_cfg = match &model_override {
        Some(m) => smithers_model::resolve_model_from_config(&config, m),
        None => config.model.clone(),
    };
    let model: Arc<dyn smithers_model::ModelProvider> =
        Arc::from(smithers_model::from_config(&model_cfg)?);

    let agent = AgentBuilder::new(config.clone())
        .with_runtime_context(RuntimeContext::auto_detect())
        .build(model);

    let store = Store::open(default_store_path().as_deref())?;
    let session_id = store.current_session()?.id;
    recover_session(&store, session_id)?;
    store.purge_ephemeral(session_id)?;
    let already_seen = store.get_messages(session_id)?.len();

    let (handle, join) = Worker::new(store.clone(), agent, session_id).spawn();
    handle.submit(&prompt)?;

    loop {
        let settled = !store.has_pending(session_id)?
            && store
                .active_run(session_id)?
                .map(|r| matches!(r.status, RunStatus::Complete | RunStatus::Error))
                .unwrap_or(true);
        if settled {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    handle.stop();
    let _ = join.await;

    for m in store.get_messages(session_id)?.into_iter().skip(already_seen) {
        match m.role {
            smithers_store::Role::Assistant => println!("{}", m.content),
            smithers_store::Role::System => eprintln!("{}", m.content),
            smithers_store::Role::User => {}
        }
    }
    Ok(())
}

/// Default location for the durable session store: a per-user app directory
/// under `HOME`. Falls back to `None` (in-memory, non-durable) if no home
/// directory can be resolved.
fn default_store_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(".smithers").join("chat.db"))
}

/// Ring-buffer capacity for crash dumps. Generous enough to cover a full
/// agentic turn (streaming + several tool calls) without costing much RSS.
const OBSERVABILITY_CAPACITY: usize = 4096;

/// Installs the tracing subscriber and returns the [`ObservabilityHandle`]
/// feeding its ring buffer, so `main` can dump it on panic regardless of
/// which formatting layer (file, stderr, or none) is active.
fn init_logging(verbosity: u8, is_tui: bool) -> ObservabilityHandle {
    let observability = ObservabilityHandle::new(OBSERVABILITY_CAPACITY, ObsLevel::Trace);

    if is_tui {
        if let Ok(log_path) = std::env::var("SMITHERS_LOG_FILE") {
            use std::sync::Mutex;
            if let Ok(file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
            {
                let filter = EnvFilter::try_from_env("SMITHERS_DEBUG_LEVEL")
                    .or_else(|_| EnvFilter::try_from_default_env())
                    .unwrap_or_else(|_| EnvFilter::new("debug"));
                let _ = tracing_subscriber::registry()
                    .with(observability.layer())
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_ansi(false)
                            .with_writer(Mutex::new(file)),
                    )
                    .with(filter)
                    .try_init();
                return observability;
            }
        }
        // No output layer, but the ring buffer still records at full detail
        // so a crash dump has something to show even with no log file set.
        let _ = tracing_subscriber::registry()
            .with(observability.layer())
            .try_init();
        return observability;
    }

    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("SMITHERS_DEBUG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(observability.layer())
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    observability
}

/// Chains onto whatever panic hook is currently installed (the default one,
/// at this point in startup) so a panic also writes the ring buffer's
/// contents to a crash-dump file before the process tears down.
fn install_crash_dump_hook(observability: ObservabilityHandle) {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Some(path) = crash_dump_path() {
            let mut dump = observability.dump_to_string();
            dump.push_str("\n--- panic ---\n");
            dump.push_str(&info.to_string());
            dump.push('\n');
            let _ = std::fs::write(path, dump);
        }
        previous_hook(info);
    }));
}

/// `SMITHERS_CRASH_DIR` overrides where dumps land; defaults to the OS temp
/// directory so a crash dump is written even on an unconfigured machine.
fn crash_dump_path() -> Option<std::path::PathBuf> {
    let dir = std::env::var("SMITHERS_CRASH_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir());
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir.join(format!("smithers-crash-{}.log", std::process::id())))
}
