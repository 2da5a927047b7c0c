use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_is_contiguous, init_tracing, test_config, wait_for_committed},
    mock_rpc::{MockChain, MockRpcServer},
};
use anyhow::{anyhow, Context, Result};
use cosmoblock::{EventBus, HealthStatus, Indexer, MemoryStore, Runner};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_can_restart_after_stop() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(10);
    let server = MockRpcServer::start(chain.clone()).await?;

    let store = Arc::new(MemoryStore::new());
    let config = test_config(server.url(), |builder| builder.minimal(true))?;
    let mut runner = Runner::new(Indexer::new(config, store.clone(), EventBus::new())?);

    runner.start();
    wait_for_committed(&store, 10, Duration::from_secs(10)).await?;
    runner.stop().await?;
    assert!(!runner.is_running());
    assert_eq!(runner.indexer().health_status(), HealthStatus::Stopped);

    chain.set_tip(20);
    runner.start();
    wait_for_committed(&store, 20, Duration::from_secs(10)).await?;
    runner.stop().await?;
    server.shutdown().await;

    let committed = store.committed_heights();
    assert_eq!(committed, (1..=committed.len() as u64).collect::<Vec<_>>());
    assert!(committed.len() >= 20);
    assert_is_contiguous(&committed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_returns_when_token_is_cancelled() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(3);
    let server = MockRpcServer::start(chain).await?;

    let store = Arc::new(MemoryStore::new());
    let config = test_config(server.url(), |builder| builder.minimal(true))?;
    let mut runner = Runner::new(Indexer::new(config, store.clone(), EventBus::new())?);
    let token = runner.cancellation_token();

    let cancel = tokio::spawn({
        let store = store.clone();
        async move {
            wait_for_committed(&store, 3, Duration::from_secs(10)).await?;
            token.cancel();
            Ok::<_, anyhow::Error>(())
        }
    });

    timeout(Duration::from_secs(10), runner.run_until_ctrl_c())
        .await
        .context("runner should stop after cancellation")??;
    cancel
        .await
        .map_err(|err| anyhow!("cancel task panicked: {err}"))??;

    assert_eq!(store.committed_heights(), vec![1, 2, 3]);
    assert!(
        !runner.cancellation_token().is_cancelled(),
        "runner must hand out a fresh token after shutdown"
    );
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_surfaces_invalid_push_configuration() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(3);
    let server = MockRpcServer::start(chain).await?;

    let config = test_config(server.url(), |builder| builder.push())?;
    let mut runner = Runner::new(Indexer::new(
        config,
        Arc::new(MemoryStore::new()),
        EventBus::new(),
    )?);

    let outcome = timeout(Duration::from_secs(5), runner.run_until_ctrl_c())
        .await
        .context("runner should stop after a preflight failure")?;
    let err = outcome.expect_err("push mode without a subscription must be rejected");
    assert!(
        format!("{err:#}").contains("push"),
        "unexpected error: {err:#}"
    );
    assert_eq!(runner.indexer().health_status(), HealthStatus::Failed);

    server.shutdown().await;
    Ok(())
}
