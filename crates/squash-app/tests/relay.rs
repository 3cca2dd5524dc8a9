use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use flate2::read::GzDecoder;
use squash_app::{
    AppError, AppResult, Application, DispatchSummary, JobOutcome, RunSummary, ShutdownSignal,
    ShutdownState,
};
use squash_app::job::{ATTR_BUCKET_ID, ATTR_EVENT_TYPE, ATTR_OBJECT_ID, EVENT_OBJECT_FINALIZE};
use squash_config::{RawSettings, RunConfig};
use squash_pipeline::{CONTENT_ENCODING, PipelineError};
use squash_store::{MemoryObjectStore, ObjectLocation, StoreOperation, WriteOptions};
use squash_telemetry::Metrics;
use squash_transport::{Attributes, MemoryTransport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SUBSCRIPTION: &str = "squash-notifications";
const TOPIC: &str = "squash-redelivery";

fn event_settings(workers: usize) -> RawSettings {
    RawSettings {
        compression_level: 1,
        source_bucket: "b1".into(),
        destination_bucket: "b2".into(),
        subscription: Some(SUBSCRIPTION.into()),
        topic: Some(TOPIC.into()),
        workers: Some(workers),
        grace_period: Some(Duration::from_millis(200)),
        ..RawSettings::default()
    }
}

fn direct_settings(object: &str) -> RawSettings {
    RawSettings {
        compression_level: 1,
        source_bucket: "b1".into(),
        destination_bucket: "b2".into(),
        source_object: Some(object.into()),
        ..RawSettings::default()
    }
}

fn notification(bucket: &str, object: &str) -> Attributes {
    Attributes::from([
        (ATTR_BUCKET_ID.to_string(), bucket.to_string()),
        (ATTR_OBJECT_ID.to_string(), object.to_string()),
        (ATTR_EVENT_TYPE.to_string(), EVENT_OBJECT_FINALIZE.to_string()),
    ])
}

fn repeating(len: usize) -> Vec<u8> {
    b"squash,relay,report\n".iter().copied().cycle().take(len).collect()
}

fn gunzip(data: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(decoded)
}

fn application(
    settings: RawSettings,
    store: &MemoryObjectStore,
    transport: &MemoryTransport,
) -> anyhow::Result<Arc<Application>> {
    let config = RunConfig::from_raw(settings)?;
    Ok(Arc::new(Application::new(
        config,
        Arc::new(store.clone()),
        Arc::new(transport.clone()),
        Metrics::new()?,
    )))
}

struct Running {
    signals: mpsc::Sender<ShutdownSignal>,
    task: JoinHandle<AppResult<RunSummary>>,
}

fn start(app: &Arc<Application>) -> Running {
    let (signals, receiver) = mpsc::channel(4);
    let app = Arc::clone(app);
    let task = tokio::spawn(async move { app.run(receiver).await });
    Running { signals, task }
}

impl Running {
    async fn stop(self) -> anyhow::Result<AppResult<RunSummary>> {
        self.signals.send(ShutdownSignal::Terminate).await?;
        Ok(tokio::time::timeout(Duration::from_secs(5), self.task).await??)
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

fn dispatch_summary(result: AppResult<RunSummary>) -> anyhow::Result<DispatchSummary> {
    match result? {
        RunSummary::EventDriven(summary) => Ok(summary),
        other => bail!("unexpected run summary {other:?}"),
    }
}

#[tokio::test]
async fn finalized_object_is_compressed_and_source_removed() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new();
    let transport = MemoryTransport::new();
    let source = ObjectLocation::new("b1", "report.csv");
    let destination = ObjectLocation::new("b2", "report.csv");
    let data = repeating(10_000);
    store.put(&source, data.clone(), WriteOptions::default());

    let app = application(event_settings(2), &store, &transport)?;
    let running = start(&app);
    transport.push(SUBSCRIPTION, notification("b1", "report.csv"), "{}");

    wait_until("source removal", || !store.contains(&source)).await?;
    let summary = dispatch_summary(running.stop().await?)?;
    assert_eq!(summary.received, 1);
    assert_eq!(summary.accepted, 1);

    let attrs = store
        .stored_attrs(&destination)
        .context("destination missing")?;
    assert_eq!(attrs.content_encoding.as_deref(), Some(CONTENT_ENCODING));
    assert!(attrs.size < 10_000);
    let compressed = store.contents(&destination).context("destination missing")?;
    assert_eq!(gunzip(&compressed)?, data);

    assert_eq!(transport.acked().len(), 1);
    assert!(transport.published().is_empty());
    let snapshot = app.metrics().snapshot();
    assert_eq!(snapshot.jobs_completed, 1);
    assert_eq!(snapshot.bytes_read, 10_000);
    assert_eq!(*app.shutdown_state().borrow(), ShutdownState::Terminated);
    Ok(())
}

#[tokio::test]
async fn notifications_for_other_buckets_are_acked_without_work() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new();
    let transport = MemoryTransport::new();

    let app = application(event_settings(2), &store, &transport)?;
    let running = start(&app);
    transport.push(SUBSCRIPTION, notification("other", "report.csv"), "{}");
    transport.push(SUBSCRIPTION, notification("b1", "report.csv.dax-tmp"), "{}");

    wait_until("acknowledgements", || transport.acked().len() == 2).await?;
    let summary = dispatch_summary(running.stop().await?)?;
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.accepted, 0);
    assert!(store.journal().is_empty());
    assert!(transport.published().is_empty());
    Ok(())
}

#[tokio::test]
async fn interrupted_job_is_republished_once_on_shutdown() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new()
        .with_chunk_size(100)
        .with_chunk_delay(Duration::from_millis(100));
    let transport = MemoryTransport::new();
    let source = ObjectLocation::new("b1", "slow.csv");
    store.put(&source, repeating(2_000), WriteOptions::default());

    let app = application(event_settings(1), &store, &transport)?;
    let running = start(&app);
    let attributes = notification("b1", "slow.csv");
    transport.push(SUBSCRIPTION, attributes.clone(), "payload-bytes");

    wait_until("transfer start", || {
        !store.calls(StoreOperation::OpenWriter).is_empty()
    })
    .await?;
    dispatch_summary(running.stop().await?)?;

    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, TOPIC);
    assert_eq!(published[0].attributes, attributes);
    assert_eq!(published[0].payload.as_ref(), b"payload-bytes");

    assert!(store.contains(&source));
    assert!(!store.contains(&ObjectLocation::new("b2", "slow.csv")));
    assert_eq!(store.calls(StoreOperation::Abort).len(), 1);
    assert_eq!(app.metrics().snapshot().republished, 1);
    Ok(())
}

#[tokio::test]
async fn full_queue_stops_pulling_notifications() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new()
        .with_chunk_size(100)
        .with_chunk_delay(Duration::from_millis(100));
    let transport = MemoryTransport::new();
    for index in 0..6 {
        let object = format!("part-{index}.csv");
        store.put(
            &ObjectLocation::new("b1", object.as_str()),
            repeating(2_000),
            WriteOptions::default(),
        );
        transport.push(SUBSCRIPTION, notification("b1", &object), "{}");
    }

    let app = application(event_settings(1), &store, &transport)?;
    let running = start(&app);
    wait_until("transfer start", || {
        !store.calls(StoreOperation::OpenWriter).is_empty()
    })
    .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // One job in flight, one queued, one acked and waiting to enqueue.
    assert!(transport.acked().len() <= 3);
    assert!(transport.pending(SUBSCRIPTION) >= 3);

    dispatch_summary(running.stop().await?)?;
    assert_eq!(transport.published().len(), transport.acked().len());
    Ok(())
}

#[tokio::test]
async fn acked_jobs_cut_off_by_termination_still_reach_failure_handling() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new()
        .with_chunk_size(100)
        .with_chunk_delay(Duration::from_millis(100));
    let transport = MemoryTransport::new();
    transport.set_publish_delay(Some(Duration::from_secs(1)));
    for index in 0..3 {
        let object = format!("batch-{index}.csv");
        store.put(
            &ObjectLocation::new("b1", object.as_str()),
            repeating(2_000),
            WriteOptions::default(),
        );
        transport.push(SUBSCRIPTION, notification("b1", &object), "{}");
    }

    let app = application(event_settings(1), &store, &transport)?;
    let running = start(&app);
    wait_until("transfer start", || {
        !store.calls(StoreOperation::OpenWriter).is_empty()
    })
    .await?;
    wait_until("full queue", || transport.acked().len() == 3).await?;
    dispatch_summary(running.stop().await?)?;

    // Republishing outlives the grace period, so every attempt is cut short.
    let snapshot = app.metrics().snapshot();
    assert_eq!(snapshot.republished + snapshot.republish_failed, 3);
    assert_eq!(snapshot.republish_failed, 3);
    assert!(transport.published().is_empty());
    Ok(())
}

#[tokio::test]
async fn receive_failure_is_fatal() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new();
    let transport = MemoryTransport::new();
    transport.set_fail_receive(true);

    let app = application(event_settings(2), &store, &transport)?;
    let (_signals, receiver) = mpsc::channel(1);
    let result = tokio::time::timeout(Duration::from_secs(5), app.run(receiver)).await?;
    assert!(matches!(result, Err(AppError::TransportReceive { .. })));
    assert!(app.root().is_cancelled());
    Ok(())
}

#[tokio::test]
async fn direct_mode_compresses_one_object() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new();
    let transport = MemoryTransport::new();
    let source = ObjectLocation::new("b1", "report.csv");
    store.put(&source, repeating(10_000), WriteOptions::default());

    let app = application(direct_settings("report.csv"), &store, &transport)?;
    let (_signals, receiver) = mpsc::channel(1);
    let summary = app.run(receiver).await?;
    let RunSummary::Direct(JobOutcome::Completed(report)) = summary else {
        bail!("unexpected run summary {summary:?}");
    };
    assert_eq!(report.source_size, 10_000);
    assert!(report.destination_size < 10_000);
    assert!(!store.contains(&source));
    assert!(store.contains(&ObjectLocation::new("b2", "report.csv")));
    Ok(())
}

#[tokio::test]
async fn direct_mode_reports_missing_source() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new();
    let transport = MemoryTransport::new();

    let app = application(direct_settings("absent.csv"), &store, &transport)?;
    let (_signals, receiver) = mpsc::channel(1);
    let result = app.run(receiver).await;
    assert!(matches!(
        result,
        Err(AppError::Pipeline {
            source: PipelineError::SourceUnavailable { .. },
            ..
        })
    ));
    assert!(store.calls(StoreOperation::OpenWriter).is_empty());
    Ok(())
}

#[tokio::test]
async fn rerun_after_failed_delete_resumes() -> anyhow::Result<()> {
    let store = MemoryObjectStore::new();
    let transport = MemoryTransport::new();
    let source = ObjectLocation::new("b1", "report.csv");
    let destination = ObjectLocation::new("b2", "report.csv");
    store.put(&source, repeating(4_000), WriteOptions::default());
    store.fail_on(StoreOperation::Delete, &source);

    let first = application(direct_settings("report.csv"), &store, &transport)?;
    let (_signals, receiver) = mpsc::channel(1);
    let result = first.run(receiver).await;
    assert!(matches!(
        result,
        Err(AppError::Pipeline {
            source: PipelineError::DeletionFailed { .. },
            ..
        })
    ));
    assert!(store.contains(&destination));
    let compressed = store.contents(&destination).context("destination missing")?;

    store.clear_failures();
    let second = application(direct_settings("report.csv"), &store, &transport)?;
    let (_signals, receiver) = mpsc::channel(1);
    let summary = second.run(receiver).await?;
    assert_eq!(summary, RunSummary::Direct(JobOutcome::Resumed));
    assert!(!store.contains(&source));
    assert_eq!(store.contents(&destination), Some(compressed));
    Ok(())
}
