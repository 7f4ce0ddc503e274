pub mod cache;
pub mod endpoint;
pub mod model;
pub mod processor;
pub mod reconcile;

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use mesh_accel_api::workload::DeltaResponse;
use mesh_accel_common::tables::{
    BackendKey, BackendValue, EndpointKey, EndpointValue, FrontendKey, FrontendValue, ServiceKey,
    ServiceValue,
};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;
use crate::bpf::BpfMap;
use crate::controller::processor::{Phase, Processor};

/// Process-external flag owned by the supervising orchestrator: present iff
/// the prior dataplane process programmed the current kernel-table contents.
pub struct RestartMarker {
    path: PathBuf,
}

impl RestartMarker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn is_set(&self) -> bool {
        self.path.exists()
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Drains delta responses one event at a time; every table and cache
/// mutation of an event completes before the next event starts. Apply errors
/// are logged and the loop keeps going, because the control plane re-sends
/// state on resync. Cancellation stops the loop between events.
pub async fn run<F, S, E, B>(
    mut processor: Processor<F, S, E, B>,
    mut responses: Receiver<DeltaResponse>,
    marker: RestartMarker,
    cancel: CancellationToken,
) -> Result<()>
where
    F: BpfMap<FrontendKey, FrontendValue>,
    S: BpfMap<ServiceKey, ServiceValue>,
    E: BpfMap<EndpointKey, EndpointValue>,
    B: BpfMap<BackendKey, BackendValue>,
{
    let mut recovering = processor.phase() == Phase::Recovering;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("shutdown requested, stopping between events");
                break;
            }
            response = responses.recv() => {
                let Some(response) = response else {
                    info!("delta stream closed");
                    break;
                };
                if let Err(e) = processor.handle_address_response(&response) {
                    error!(%e, "failed to apply delta response, awaiting resync");
                    continue;
                }
                if recovering && processor.phase() == Phase::Steady {
                    marker.clear()?;
                    recovering = false;
                    info!("restart marker cleared");
                }
            }
        }
    }
    Ok(())
}


#[cfg(test)]
mod test {
    use mesh_accel_api::workload::{DeltaResponse, NetworkMode};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::controller::testutil::*;

    #[tokio::test]
    async fn marker_clears_once_recovery_reaches_steady() {
        let dir = tempfile::tempdir().unwrap();
        let marker_path = dir.path().join("restart");
        std::fs::write(&marker_path, b"").unwrap();
        let marker = RestartMarker::new(marker_path.clone());
        assert!(marker.is_set());

        let mut processor = new_processor(&dir);
        processor.begin_recovery().unwrap();

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let mut snapshot = DeltaResponse::default();
        snapshot.push(fake_service("svc1", &["10.240.10.1"], None));
        snapshot.push(fake_workload(
            "wl1",
            "10.244.0.1",
            NetworkMode::Standard,
            &["svc1"],
        ));
        tx.send(snapshot).await.unwrap();
        drop(tx);

        run(processor, rx, marker, CancellationToken::new())
            .await
            .unwrap();
        assert!(!marker_path.exists());
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let processor = new_processor(&dir);
        let marker = RestartMarker::new(dir.path().join("restart"));
        let (_tx, rx) = tokio::sync::mpsc::channel::<DeltaResponse>(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        run(processor, rx, marker, cancel).await.unwrap();
    }
}
