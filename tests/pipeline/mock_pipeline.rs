use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crate::support::{
    helpers::{
        assert_is_contiguous, init_tracing, message, test_config, tx, wait_for_committed,
        Recorder,
    },
    mock_rpc::{failed_result, ok_result, MockChain, MockRpcServer},
};
use anyhow::{anyhow, Result};
use cosmoblock::{
    bus::topics, handler_fn, Envelope, EventBus, HealthStatus, Indexer, MemoryStore, RpcError,
};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const SEND: &str = "/cosmos.bank.v1beta1.MsgSend";
const DELEGATE: &str = "/cosmos.staking.v1beta1.MsgDelegate";

fn spawn(indexer: &Indexer<MemoryStore>) -> JoinHandle<Result<()>> {
    let indexer = indexer.clone();
    tokio::spawn(async move { indexer.run().await })
}

async fn stop(indexer: &Indexer<MemoryStore>, task: JoinHandle<Result<()>>) -> Result<()> {
    indexer.cancellation_token().cancel();
    timeout(Duration::from_secs(5), task)
        .await
        .map_err(|_| anyhow!("indexer did not stop in time"))?
        .map_err(|err| anyhow!("indexer task panicked: {err}"))?
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn indexes_heights_in_order_over_json_rpc() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(12);
    chain.set_txs(
        3,
        vec![
            tx(vec![message(SEND)], "rejected"),
            tx(vec![message(SEND)], "rent"),
        ],
        vec![failed_result(5), ok_result(SEND)],
    );
    let server = MockRpcServer::start(chain.clone()).await?;

    let bus = EventBus::new();
    let recorder = Recorder::default();
    recorder.listen(
        &bus,
        &[
            topics::BLOCK,
            topics::BEGIN_BLOCK,
            topics::TX_EVENTS,
            topics::TX_MEMO,
            SEND,
            topics::END_BLOCK,
        ],
    );

    let store = Arc::new(MemoryStore::new());
    let config = test_config(server.url(), |builder| builder.minimal(true))?;
    let indexer = Indexer::new(config, store.clone(), bus)?;

    let task = spawn(&indexer);
    wait_for_committed(&store, 12, Duration::from_secs(10)).await?;
    stop(&indexer, task).await?;
    server.shutdown().await;

    let committed = store.committed_heights();
    assert_eq!(committed.first(), Some(&1));
    assert_is_contiguous(&committed);
    assert!(store.rolled_back_heights().is_empty());

    assert_eq!(
        recorder.kinds_at(3),
        vec![
            topics::BLOCK,
            topics::BEGIN_BLOCK,
            topics::TX_EVENTS,
            topics::TX_EVENTS,
            topics::TX_MEMO,
            SEND,
            topics::END_BLOCK,
        ]
    );
    assert_eq!(
        recorder.kinds_at(4),
        vec![topics::BLOCK, topics::BEGIN_BLOCK, topics::END_BLOCK]
    );
    assert_eq!(indexer.health_status(), HealthStatus::Stopped);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn follows_the_tip_as_it_advances() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(5);
    let server = MockRpcServer::start(chain.clone()).await?;

    let bus = EventBus::new();
    let recorder = Recorder::default();
    recorder.listen(&bus, &[topics::BLOCK]);

    let store = Arc::new(MemoryStore::new());
    let config = test_config(server.url(), |builder| builder.minimal(true))?;
    let indexer = Indexer::new(config, store.clone(), bus)?;
    let mut health = indexer.health();

    let task = spawn(&indexer);
    wait_for_committed(&store, 5, Duration::from_secs(10)).await?;
    timeout(
        Duration::from_secs(5),
        health.wait_for(|status| *status == HealthStatus::Steady),
    )
    .await
    .map_err(|_| anyhow!("indexer never reported steady state"))??;

    chain.set_tip(9);
    wait_for_committed(&store, 9, Duration::from_secs(10)).await?;
    stop(&indexer, task).await?;
    server.shutdown().await;

    let heights = recorder.heights_of(topics::BLOCK);
    assert_eq!(heights, (1..=heights.len() as u64).collect::<Vec<_>>());
    assert!(heights.len() >= 9);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_rpc_errors_are_retried_without_rollback() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(6);
    chain.fail_once("block_results", 4);
    chain.fail_once("block", 2);
    let server = MockRpcServer::start(chain.clone()).await?;

    let store = Arc::new(MemoryStore::new());
    let config = test_config(server.url(), |builder| builder.minimal(true))?;
    let indexer = Indexer::new(config, store.clone(), EventBus::new())?;

    let task = spawn(&indexer);
    wait_for_committed(&store, 6, Duration::from_secs(10)).await?;
    stop(&indexer, task).await?;
    server.shutdown().await;

    assert_eq!(store.committed_heights(), vec![1, 2, 3, 4, 5, 6]);
    assert!(store.rolled_back_heights().is_empty());
    assert_eq!(indexer.telemetry().snapshot().restarts, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listener_failure_rolls_back_and_resumes_at_same_height() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(4);
    chain.set_txs(
        2,
        vec![tx(vec![message(DELEGATE)], "")],
        vec![ok_result(DELEGATE)],
    );
    let server = MockRpcServer::start(chain.clone()).await?;

    let bus = EventBus::new();
    let tripped = Arc::new(AtomicBool::new(false));
    let deliveries = Arc::new(AtomicUsize::new(0));
    {
        let tripped = tripped.clone();
        let deliveries = deliveries.clone();
        bus.on(
            DELEGATE,
            handler_fn(move |_envelope: Arc<Envelope>| {
                let first = !tripped.swap(true, Ordering::SeqCst);
                deliveries.fetch_add(1, Ordering::SeqCst);
                async move {
                    if first {
                        return Err(anyhow!("delegation table locked"));
                    }
                    Ok(())
                }
            }),
        );
    }

    let store = Arc::new(MemoryStore::new());
    let config = test_config(server.url(), |builder| builder.minimal(true))?;
    let indexer = Indexer::new(config, store.clone(), bus)?;

    let task = spawn(&indexer);
    wait_for_committed(&store, 4, Duration::from_secs(10)).await?;
    stop(&indexer, task).await?;
    server.shutdown().await;

    assert_eq!(store.rolled_back_heights(), vec![2]);
    assert_eq!(store.committed_heights(), vec![1, 2, 3, 4]);
    assert_eq!(deliveries.load(Ordering::SeqCst), 2);

    let snapshot = indexer.telemetry().snapshot();
    assert_eq!(snapshot.rollbacks, 1);
    assert!(snapshot.restarts >= 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_mode_attaches_every_validator_page() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(2);
    chain.set_validator_count(150);
    let server = MockRpcServer::start(chain.clone()).await?;

    let bus = EventBus::new();
    let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let sizes = sizes.clone();
        bus.on(
            topics::BLOCK,
            handler_fn(move |envelope: Arc<Envelope>| {
                let size = envelope
                    .payload
                    .as_block()
                    .and_then(|data| data.validators.as_ref())
                    .map(|set| set.validators.len());
                sizes.lock().expect("sizes lock poisoned").push(size);
                async { Ok(()) }
            }),
        );
    }

    let store = Arc::new(MemoryStore::new());
    let config = test_config(server.url(), |builder| builder.minimal(false))?;
    let indexer = Indexer::new(config, store.clone(), bus)?;

    let task = spawn(&indexer);
    wait_for_committed(&store, 2, Duration::from_secs(10)).await?;
    stop(&indexer, task).await?;
    server.shutdown().await;

    let sizes = sizes.lock().expect("sizes lock poisoned").clone();
    assert_eq!(sizes, vec![Some(150), Some(150)]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn abci_queries_go_through_the_indexer() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(1);
    chain.set_query("/cosmos.bank.v1beta1.Query/Balance", b"1000uatom");
    let server = MockRpcServer::start(chain.clone()).await?;

    let config = test_config(server.url(), |builder| builder)?;
    let indexer = Indexer::new(config, Arc::new(MemoryStore::new()), EventBus::new())?;
    let query = indexer.query();

    let value = query
        .abci_query("/cosmos.bank.v1beta1.Query/Balance", b"\x0a\x01", None)
        .await?;
    assert_eq!(value.as_ref(), b"1000uatom");

    let err = query
        .abci_query("/cosmos.gov.v1.Query/Proposal", b"", Some(1))
        .await
        .expect_err("unknown path must fail");
    assert!(
        matches!(
            err.downcast_ref::<RpcError>(),
            Some(RpcError::QueryFailed { code: 6, .. })
        ),
        "unexpected error: {err:#}"
    );

    assert_eq!(query.latest_height().await?, 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resumes_from_the_store_cursor() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(10);
    let server = MockRpcServer::start(chain.clone()).await?;

    let bus = EventBus::new();
    let recorder = Recorder::default();
    recorder.listen(&bus, &[topics::BLOCK]);

    let store = Arc::new(MemoryStore::with_next_height(7));
    let config = test_config(server.url(), |builder| builder.minimal(true))?;
    let indexer = Indexer::new(config, store.clone(), bus)?;

    let task = spawn(&indexer);
    wait_for_committed(&store, 10, Duration::from_secs(10)).await?;
    // Give a stray dispatch past the tip a chance to show up.
    sleep(Duration::from_millis(100)).await;
    stop(&indexer, task).await?;
    server.shutdown().await;

    assert_eq!(recorder.heights_of(topics::BLOCK), vec![7, 8, 9, 10]);
    assert!(chain.requests() > 0);
    Ok(())
}
