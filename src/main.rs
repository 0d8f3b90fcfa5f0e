use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use url::Url;

use minimealie::activity;
use minimealie::background::{Background, SubmitResult};
use minimealie::capture::{HttpPageCapture, TabRef};
use minimealie::cli::{Cli, Command, DetectArgs, LogCommand, LogShowArgs, ModeArgs, SubmitArgs};
use minimealie::event_log::LogEvent;
use minimealie::mealie::MealieClient;
use minimealie::settings::{self, CreateMode, Settings};
use minimealie::storage::{self, JsonFileStore, KeyValueStore, Scope};
use minimealie::surface::ConsoleSurface;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    minimealie::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let data_dir = resolve_data_dir(cli.data_dir)?;
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&data_dir));
    let api = Arc::new(MealieClient::new().context("build mealie client")?);
    let capture = Arc::new(HttpPageCapture::new().context("build capture client")?);
    let background = Background::new(store.clone(), Arc::new(ConsoleSurface), api, capture);

    match cli.command {
        Command::Connect(args) => {
            let user = background
                .connect(&args.server, &args.token)
                .await
                .context("connect")?;
            println!("connected as {}", user.username);
        }
        Command::Detect(args) => detect(&background, args).await?,
        Command::Submit(args) => submit(&background, args).await?,
        Command::Mode(args) => mode(&background, store.as_ref(), args).await?,
        Command::Status => status(&background, store.as_ref()).await?,
        Command::Log {
            command: LogCommand::Show(args),
        } => show_log(&background, args).await?,
        Command::Log {
            command: LogCommand::Clear,
        } => {
            background.event_log().clear().await.context("clear log")?;
            println!("event log cleared");
        }
    }

    Ok(())
}

fn resolve_data_dir(flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Ok(dir) = std::env::var("MINIMEALIE_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    Ok(PathBuf::from(".minimealie"))
}

fn tab_from(url: &str, title: Option<String>, tab_id: i64) -> anyhow::Result<TabRef> {
    let url = Url::parse(url).context("parse --url")?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("--url must be http/https: {url}");
    }
    let mut tab = TabRef::new(tab_id, url);
    tab.title = title;
    Ok(tab)
}

async fn detect(background: &Background, args: DetectArgs) -> anyhow::Result<()> {
    let tab = tab_from(&args.url, args.title, 1)?;
    match background.handle_page_visit(&tab).await.context("detect")? {
        Some(entry) => {
            match entry.status {
                Some(status) => println!("{} (HTTP {status})", entry.outcome.as_str()),
                None => println!("{}", entry.outcome.as_str()),
            }
            Ok(())
        }
        None => anyhow::bail!("detection skipped: configure server and token first"),
    }
}

async fn submit(background: &Background, args: SubmitArgs) -> anyhow::Result<()> {
    let tab = tab_from(&args.url, args.title, args.tab_id)?;

    if !args.no_probe {
        background
            .handle_page_visit(&tab)
            .await
            .context("pre-submission probe")?;
    }

    match background.create_recipe(&tab).await.context("submit")? {
        SubmitResult::Created => {
            println!("recipe added");
            Ok(())
        }
        SubmitResult::Rejected => {
            anyhow::bail!("the server could not build a recipe from this page")
        }
        SubmitResult::Failed => anyhow::bail!("submission failed; see `minimealie log show`"),
        SubmitResult::SuggestedHtmlMode => {
            println!(
                "this page is unlikely to work in url mode; try `minimealie mode --set html`"
            );
            Ok(())
        }
        SubmitResult::MissingConfig => {
            anyhow::bail!("server and token not configured; run `minimealie connect` first")
        }
        SubmitResult::InvalidTab => anyhow::bail!("tab has no id or url"),
    }
}

async fn mode(
    background: &Background,
    store: &dyn KeyValueStore,
    args: ModeArgs,
) -> anyhow::Result<()> {
    if let Some(raw) = args.set {
        let mode = CreateMode::parse(&raw)
            .ok_or_else(|| anyhow::anyhow!("mode must be `url` or `html`: {raw}"))?;
        settings::store_create_mode(store, mode).await?;
        println!("mode set to {}", mode.as_str());
        return Ok(());
    }

    let settings = Settings::load(store).await.context("load settings")?;
    println!("mode: {}", settings.create_mode.as_str());
    if background.take_html_suggestion().await? {
        println!("hint: the last url-mode attempt suggested switching to html capture");
    }
    Ok(())
}

async fn status(
    background: &Background,
    store: &dyn KeyValueStore,
) -> anyhow::Result<()> {
    let settings = Settings::load(store).await.context("load settings")?;
    match &settings.server {
        Some(server) => println!("server: {server}"),
        None => println!("server: not configured"),
    }
    match &settings.username {
        Some(username) => println!("user: {username}"),
        None => println!("user: unknown"),
    }
    println!("mode: {}", settings.create_mode.as_str());

    let suggested: Option<bool> =
        storage::get_json(store, Scope::Local, settings::SUGGEST_HTML_MODE_KEY)
            .await
            .context("read suggestion flag")?;
    if suggested == Some(true) {
        println!("pending suggestion: switch to html capture mode");
    }

    match activity::stored_state(store).await.context("read activity")? {
        Some(state) => println!(
            "activity: {} in flight ({})",
            state.active_count,
            state.label.as_deref().unwrap_or("unlabeled")
        ),
        None => println!("activity: idle"),
    }

    let events = background.event_log().recent(Some(1)).await?;
    if let Some(last) = events.last() {
        println!("last event: {}", format_event(last));
    }
    Ok(())
}

async fn show_log(background: &Background, args: LogShowArgs) -> anyhow::Result<()> {
    let events = background
        .event_log()
        .recent(Some(args.limit))
        .await
        .context("read event log")?;
    if events.is_empty() {
        println!("event log is empty");
        return Ok(());
    }
    for event in &events {
        println!("{}", format_event(event));
    }
    Ok(())
}

fn format_event(event: &LogEvent) -> String {
    let when = chrono::DateTime::from_timestamp_millis(event.ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| event.ts.to_string());
    let phase = event
        .phase
        .map(|phase| format!(" [{}]", phase.as_str()))
        .unwrap_or_default();
    format!(
        "{when} {:5} {}/{}{} {}",
        event.level.as_str(),
        event.feature.as_str(),
        event.action,
        phase,
        event.message
    )
}
