//! `solasola-tab` -- terminal front-end for a SolaSola server.
//!
//! One process plays one browser tab: it owns a client identity, a
//! session (file-backed when `SOLASOLA_SESSION_DIR` is set, so a later
//! `resume` can re-attach), a notification queue and a push connection.
//! Every view event is printed to stdout as one JSON line.
//!
//! # Environment variables
//!
//! See [`ClientConfig::from_env`]; `.env` is honoured.

mod app;
mod cli;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solasola_client::{ProcessingMode, SubmitRequest, UploadFile};
use solasola_core::config::ClientConfig;
use solasola_core::install::ManageStatus;
use solasola_core::integrity::{check_file, FileCheck};
use solasola_install::{InstallCoordinator, InstallViewEvent};
use solasola_pipeline::{LifecycleState, TaskLifecycleManager, TaskViewEvent};

use crate::app::Tab;
use crate::cli::{Args, Cmd, ModelsCmd};

/// How long `models delete` waits for the server's confirmation broadcast.
const DELETE_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.json);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "solasola-tab failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "solasola_tab=info,solasola_pipeline=info,solasola_install=info,solasola_events=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = ClientConfig::from_env().context("invalid configuration")?;
    let tab = Tab::open(config, &args.session).await?;

    if let Cmd::Log { clear } = args.cmd {
        let log = tab.notifications.log();
        log.refresh();
        if !log.is_empty() {
            println!("{}", log.copy());
        }
        if clear {
            log.clear();
        }
        return Ok(ExitCode::SUCCESS);
    }

    let driver = tab.notifications.spawn_driver();
    print_events("toast", tab.notifications.subscribe());
    let stream = tab.spawn_stream();

    let interrupt = tab.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            interrupt.cancel();
        }
    });

    let code = match args.cmd {
        Cmd::Process {
            files,
            lyrics,
            lyrics_only,
            digests,
            fields,
        } => {
            let (request, checks) =
                build_submission(&files, lyrics.as_deref(), lyrics_only, digests, fields).await?;
            let manager = start_lifecycle(&tab)?;
            manager.submit(request, &checks).await?;
            follow_task(&tab, &manager).await
        }
        Cmd::Resume => {
            let manager = start_lifecycle(&tab)?;
            match manager.resume()? {
                Some(_) => follow_task(&tab, &manager).await,
                None => ExitCode::SUCCESS,
            }
        }
        Cmd::Cancel => {
            let manager = start_lifecycle(&tab)?;
            match manager.resume()? {
                Some(_) => {
                    manager.cancel().await?;
                    follow_task(&tab, &manager).await
                }
                None => ExitCode::SUCCESS,
            }
        }
        Cmd::Models { action } => run_models(&tab, action).await?,
        Cmd::Watch => {
            let manager = start_lifecycle(&tab)?;
            let installs = start_installs(&tab).await?;
            print_events("task", manager.subscribe());
            manager.resume()?;
            tab.cancel.cancelled().await;
            manager.shutdown();
            drop(installs);
            ExitCode::SUCCESS
        }
        Cmd::Log { .. } => ExitCode::SUCCESS,
    };

    tab.shutdown();
    let _ = stream.await;
    let _ = driver.await;
    Ok(code)
}

// ---- task lifecycle ----

fn start_lifecycle(tab: &Tab) -> anyhow::Result<TaskLifecycleManager> {
    let (manager, posts) = tab.lifecycle()?;
    if let Some(mut posts) = posts {
        tokio::spawn(async move {
            while let Some(post) = posts.recv().await {
                print_line("host_post", &post);
            }
        });
    }
    let follower = manager.clone();
    let envelopes = tab.envelopes();
    tokio::spawn(async move { follower.follow(envelopes).await });
    Ok(manager)
}

/// Print task events until the task settles or the tab is interrupted.
async fn follow_task(tab: &Tab, manager: &TaskLifecycleManager) -> ExitCode {
    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TaskViewEvent::Completed { results }) => {
                    if let Some(results) = results.as_object() {
                        let keys: Vec<&String> = results.keys().collect();
                        tracing::info!(keys = ?keys, "Result keys");
                    }
                    print_line("task", &TaskViewEvent::Completed { results });
                }
                Ok(event) => print_line("task", &event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let state = tokio::select! {
        state = manager.wait_settled() => state,
        _ = tab.cancel.cancelled() => {
            // The stored id survives so a later `resume` can re-attach.
            manager.shutdown();
            manager.state()
        }
    };
    // Let the final events reach stdout.
    tokio::task::yield_now().await;
    printer.abort();

    match state {
        LifecycleState::Completed | LifecycleState::Cancelled | LifecycleState::Idle => {
            ExitCode::SUCCESS
        }
        _ => ExitCode::FAILURE,
    }
}

async fn build_submission(
    files: &[PathBuf],
    lyrics: Option<&Path>,
    lyrics_only: bool,
    digests: Vec<(String, String)>,
    fields: Vec<(String, String)>,
) -> anyhow::Result<(SubmitRequest, Vec<FileCheck>)> {
    let digests: HashMap<String, String> = digests.into_iter().collect();
    let mut request = SubmitRequest {
        mode: if lyrics_only {
            ProcessingMode::LyricsOnly
        } else {
            ProcessingMode::Abc
        },
        fields: fields.into_iter().collect(),
        ..Default::default()
    };
    let mut checks = Vec::new();

    for path in files {
        request.music_files.push(
            UploadFile::from_path(path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?,
        );
        checks.push(verify(path, &digests).await?);
    }
    if let Some(path) = lyrics {
        request.lyrics_file = Some(
            UploadFile::from_path(path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?,
        );
        checks.push(verify(path, &digests).await?);
    }

    // Without any expected digest there is nothing to enforce.
    if digests.is_empty() {
        checks.clear();
    }
    Ok((request, checks))
}

async fn verify(path: &Path, digests: &HashMap<String, String>) -> anyhow::Result<FileCheck> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let expected = digests.get(&name).cloned();
    let path = path.to_path_buf();
    let check = tokio::task::spawn_blocking(move || check_file(&path, expected.as_deref())).await?;
    Ok(check)
}

// ---- models ----

async fn start_installs(tab: &Tab) -> anyhow::Result<Arc<InstallCoordinator>> {
    let installs = Arc::new(tab.installs());
    installs.load().await?;
    print_events("model", installs.subscribe());
    let runner = Arc::clone(&installs);
    let envelopes = tab.envelopes();
    tokio::spawn(async move { runner.run(envelopes).await });
    Ok(installs)
}

async fn run_models(tab: &Tab, action: ModelsCmd) -> anyhow::Result<ExitCode> {
    let installs = start_installs(tab).await?;

    match action {
        ModelsCmd::List { refresh } => {
            if refresh {
                installs.refresh(true).await?;
            }
            for view in installs.views().await {
                print_line("model", &view);
            }
            Ok(ExitCode::SUCCESS)
        }
        ModelsCmd::Install { repo_id } => {
            let events = installs.subscribe();
            match installs.install(&repo_id).await? {
                ManageStatus::Running => Ok(wait_install_end(tab, &installs, &repo_id, events).await),
                _ => Ok(ExitCode::FAILURE),
            }
        }
        ModelsCmd::Cancel { repo_id } => {
            let events = installs.subscribe();
            installs.cancel(&repo_id).await?;
            Ok(wait_install_end(tab, &installs, &repo_id, events).await)
        }
        ModelsCmd::Delete { repo_id } => {
            let mut events = installs.subscribe();
            if installs.delete(&repo_id).await? != ManageStatus::Ok {
                return Ok(ExitCode::FAILURE);
            }
            let confirmed = tokio::time::timeout(DELETE_CONFIRM_TIMEOUT, async {
                loop {
                    match events.recv().await {
                        Ok(InstallViewEvent::Updated { view })
                            if view.repo_id == repo_id && !view.action_pending =>
                        {
                            return true
                        }
                        Ok(InstallViewEvent::Reloaded { .. }) => return true,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => return false,
                    }
                }
            })
            .await;
            if !matches!(confirmed, Ok(true)) {
                tracing::warn!(repo_id = %repo_id, "No confirmation broadcast, refreshing");
                installs.refresh(false).await?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Wait until `repo_id` leaves the installing state.
async fn wait_install_end(
    tab: &Tab,
    installs: &InstallCoordinator,
    repo_id: &str,
    mut events: Receiver<InstallViewEvent>,
) -> ExitCode {
    loop {
        let event = tokio::select! {
            _ = tab.cancel.cancelled() => return ExitCode::FAILURE,
            event = events.recv() => event,
        };
        match event {
            Ok(InstallViewEvent::Updated { view }) if view.repo_id == repo_id => {
                if !view.state.is_installing() && !view.action_pending {
                    return ExitCode::SUCCESS;
                }
            }
            Ok(InstallViewEvent::Reloaded { .. }) | Err(RecvError::Lagged(_)) => {
                let still = installs
                    .view(repo_id)
                    .await
                    .is_some_and(|v| v.state.is_installing());
                if !still {
                    return ExitCode::SUCCESS;
                }
            }
            Ok(_) => {}
            Err(RecvError::Closed) => return ExitCode::FAILURE,
        }
    }
}

// ---- output ----

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    source: &'a str,
    event: &'a T,
}

fn print_line<T: Serialize>(source: &str, event: &T) {
    match serde_json::to_string(&Line { source, event }) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, source, "Failed to encode event"),
    }
}

fn print_events<T>(source: &'static str, mut rx: Receiver<T>)
where
    T: Serialize + Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_line(source, &event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(source, skipped, "Output lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
