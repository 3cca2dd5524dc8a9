use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use bytes::Bytes;
use flate2::read::GzDecoder;
use squash_app::job::{ATTR_BUCKET_ID, ATTR_EVENT_TYPE, ATTR_OBJECT_ID, EVENT_OBJECT_FINALIZE};
use squash_app::{Application, RunSummary, ShutdownSignal};
use squash_config::{DEFAULT_PROJECT_ID, RawSettings, RunConfig};
use squash_pipeline::CONTENT_ENCODING;
use squash_store::{FsObjectStore, ObjectLocation, ObjectStore, WriteOptions};
use squash_telemetry::Metrics;
use squash_transport::{Attributes, MessageTransport, SpoolTransport};
use tempfile::TempDir;
use tokio::sync::mpsc;

const SUBSCRIPTION: &str = "uploads";
const TOPIC: &str = "uploads-redelivery";

fn entries(dir: &Path) -> anyhow::Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

#[tokio::test]
async fn spooled_notification_compresses_object_on_disk() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let buckets = temp.path().join("buckets");
    let spool = temp.path().join("spool");

    let store = FsObjectStore::new(&buckets);
    let source = ObjectLocation::new("b1", "logs/report.csv");
    let data: Vec<u8> = b"ts,level,message\n".iter().copied().cycle().take(20_000).collect();
    let mut writer = store.open_writer(&source, WriteOptions::default()).await?;
    writer.write(Bytes::from(data.clone())).await?;
    writer.commit().await?;

    let transport =
        SpoolTransport::new(&spool, DEFAULT_PROJECT_ID).with_poll_interval(Duration::from_millis(20));
    let attributes = Attributes::from([
        (ATTR_BUCKET_ID.to_string(), "b1".to_string()),
        (ATTR_OBJECT_ID.to_string(), "logs/report.csv".to_string()),
        (ATTR_EVENT_TYPE.to_string(), EVENT_OBJECT_FINALIZE.to_string()),
    ]);
    transport
        .publish(SUBSCRIPTION, &attributes, Bytes::from_static(b"{}"))
        .await?;

    let config = RunConfig::from_raw(RawSettings {
        compression_level: 9,
        source_bucket: "b1".into(),
        destination_bucket: "b2".into(),
        subscription: Some(SUBSCRIPTION.into()),
        topic: Some(TOPIC.into()),
        workers: Some(2),
        grace_period: Some(Duration::from_millis(100)),
        ..RawSettings::default()
    })?;
    let app = Arc::new(Application::new(
        config,
        Arc::new(store.clone()),
        Arc::new(transport),
        Metrics::new()?,
    ));
    let (signals, receiver) = mpsc::channel(1);
    let runner = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run(receiver).await })
    };

    let source_path = buckets.join("b1/logs/report.csv");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while source_path.exists() {
        if tokio::time::Instant::now() >= deadline {
            bail!("source was never removed");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    signals.send(ShutdownSignal::Interrupt).await?;
    let summary = tokio::time::timeout(Duration::from_secs(5), runner).await???;
    let RunSummary::EventDriven(summary) = summary else {
        bail!("unexpected run summary {summary:?}");
    };
    assert_eq!(summary.accepted, 1);

    let destination = ObjectLocation::new("b2", "logs/report.csv");
    let attrs = store.attrs(&destination).await?;
    assert_eq!(attrs.content_encoding.as_deref(), Some(CONTENT_ENCODING));
    assert!(attrs.size < 20_000);
    let compressed = std::fs::read(buckets.join("b2/logs/report.csv"))?;
    let mut decoded = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut decoded)?;
    assert_eq!(decoded, data);

    let leftovers = entries(&buckets.join("b2/logs"))?;
    assert_eq!(leftovers, vec!["report.csv".to_string()]);
    assert!(entries(&spool.join(DEFAULT_PROJECT_ID).join(SUBSCRIPTION))?.is_empty());
    assert!(entries(&spool.join(DEFAULT_PROJECT_ID).join(TOPIC))?.is_empty());
    Ok(())
}
