//! Process-level wiring: load the workspace, pick the current context and
//! assemble the shared collaborators every command works with. Singletons
//! stop here; everything below receives explicit handles.

use anyhow::{bail, Context as _, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use locally_core::application::engine::PipelineEngine;
use locally_core::application::variables::VariableResolver;
use locally_core::application::vault_store::{KeyvaultProvider, SnapshotVault, VaultStore};
use locally_core::application::workers::{default_workers, WorkerContext};
use locally_core::domain::context::Context;
use locally_core::infrastructure::http_client::ReqwestClient;
use locally_core::infrastructure::keyvault_client::KeyvaultClient;
use locally_core::infrastructure::loader::{ConfigLoader, Workspace};
use locally_core::infrastructure::notifications::{NotificationBus, NotificationLevel};
use locally_core::infrastructure::process::ProcessRunner;

use crate::GlobalArgs;

/// Everything a command needs after the configuration is loaded.
pub struct Session {
    pub loader: ConfigLoader,
    pub workspace: Workspace,
    pub notifications: NotificationBus,
}

impl Session {
    pub fn current_context(&self) -> Result<&Context> {
        match self.workspace.current_context() {
            Some(context) if context.valid => Ok(context),
            Some(context) => bail!("current context '{}' failed to load", context.name),
            None => bail!("no context is selected; run 'locally config contexts'"),
        }
    }
}

/// Load the global config and all contexts from the working directory.
pub fn load_session(globals: &GlobalArgs) -> Result<Session> {
    let notifications = NotificationBus::with_default_capacity();
    spawn_renderer(&notifications);

    let base_dir = std::env::current_dir().context("cannot determine working directory")?;
    let loader =
        ConfigLoader::new(base_dir, notifications.clone()).with_file(globals.file.clone());
    let workspace = loader.load().context("failed to load configuration")?;

    Ok(Session {
        loader,
        workspace,
        notifications,
    })
}

/// Register the built-in vaults for a context and sync them once. Sync
/// failures are warnings; the affected vault just stays unsynced.
pub async fn vault_store_for(context: &Context, cancel: &CancellationToken) -> Arc<VaultStore> {
    let store = Arc::new(VaultStore::new());
    store.register(Arc::new(SnapshotVault::config(context)));
    store.register(Arc::new(SnapshotVault::credentials(context)));
    store.register(Arc::new(SnapshotVault::backend(context)));
    store.register(Arc::new(SnapshotVault::global(context)));
    store.register(Arc::new(SnapshotVault::terraform()));
    store.register(Arc::new(KeyvaultProvider::new(
        context,
        Arc::new(KeyvaultClient::new()),
    )));
    store.sync_all(cancel).await;
    store
}

/// Assemble the worker context over the real process/HTTP seams.
pub async fn worker_context(
    session: &Session,
    cancel: &CancellationToken,
) -> Result<Arc<WorkerContext>> {
    let context = session.current_context()?.clone();
    let vaults = vault_store_for(&context, cancel).await;

    Ok(Arc::new(WorkerContext {
        context,
        runner: Arc::new(ProcessRunner::new()),
        secrets: Arc::new(KeyvaultClient::new()),
        http: Arc::new(ReqwestClient::new()),
        vaults: vaults.clone(),
        resolver: Arc::new(VariableResolver::new(vaults)),
        notifications: session.notifications.clone(),
    }))
}

/// The engine with the full built-in worker set registered.
pub fn engine(ctx: Arc<WorkerContext>) -> PipelineEngine {
    let mut engine = PipelineEngine::new(ctx);
    for worker in default_workers() {
        engine.register(worker);
    }
    engine
}

/// Render notifications to the terminal for the lifetime of the process.
fn spawn_renderer(notifications: &NotificationBus) {
    use colored::Colorize;

    let mut receiver = notifications.subscribe();
    tokio::spawn(async move {
        while let Some(notification) = receiver.recv().await {
            let line = format!("[{}] {}", notification.code, notification.message);
            match notification.level {
                NotificationLevel::Error | NotificationLevel::Critical => {
                    eprintln!("{}", line.red())
                }
                NotificationLevel::Warning => eprintln!("{}", line.yellow()),
                NotificationLevel::Success => println!("{}", line.green()),
                NotificationLevel::Debug => tracing::debug!("{line}"),
                NotificationLevel::Info => println!("{line}"),
            }
        }
    });
}
