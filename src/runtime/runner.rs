use crate::processor::Indexer;
use crate::runtime::storage::IndexerStore;
use anyhow::{anyhow, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives an [`Indexer`] on a background task and handles OS signals for
/// graceful shutdowns.
pub struct Runner<S: IndexerStore> {
    indexer: Indexer<S>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl<S: IndexerStore> Runner<S> {
    /// Wires a fresh root [`CancellationToken`] through the indexer.
    pub fn new(indexer: Indexer<S>) -> Self {
        let shutdown = CancellationToken::new();
        let indexer = indexer.with_cancellation_token(shutdown.clone());
        Self {
            indexer,
            shutdown,
            task: None,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn indexer(&self) -> &Indexer<S> {
        &self.indexer
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Starts the indexer supervisor on its own task.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let indexer = self.indexer.clone();
        self.task = Some(tokio::spawn(async move { indexer.run().await }));
    }

    /// Cancels the root token and waits for the supervisor to exit.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        self.shutdown.cancel();
        let result = join(task).await;
        self.reinitialize_shutdown_token();
        result
    }

    /// Runs until Ctrl-C (SIGINT), external cancellation, or a fatal indexer error.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start();
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        let finished = tokio::select! {
            result = &mut task => Some(flatten(result)),
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
                None
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
                None
            }
        };

        let result = match finished {
            Some(result) => result,
            None => {
                self.shutdown.cancel();
                join(task).await
            }
        };
        self.reinitialize_shutdown_token();
        result
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.indexer.replace_shutdown_root(self.shutdown.clone());
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    flatten(task.await)
}

fn flatten(result: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    result.map_err(|err| anyhow!("indexer task failed: {err}"))?
}
