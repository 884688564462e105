//! Per-file orchestration: readiness → enrich → preflight → upload → remote
//! build → filing → cleanup.
//!
//! # Responsibilities
//! - Drive one file at a time through the stages; no retries.
//! - Turn every stage failure into an [`Outcome`] instead of propagating it.
//! - File the source exactly once, then remove the enriched artifact whatever
//!   happened before.
//!
//! # Navigation
//! - Main loop: [`Pipeline::run_until`]
//! - Single file: [`Pipeline::process`]

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::AgentConfig;
use crate::contract::{Clock, ReachabilityProbe, RemoteTransport};
use crate::delivery::{remote_path_for, Delivery};
use crate::enrich::{date_stamp, enrich, EnrichedArtifact};
use crate::error::PipelineError;
use crate::filer::{Outcome, OutcomeFiler};
use crate::watch::{is_candidate, wait_until_settled, Readiness, WatchEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Settling,
    Enriching,
    Preflighting,
    Uploading,
    RemoteExecuting,
    Filing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Settling => "settling",
            Stage::Enriching => "enriching",
            Stage::Preflighting => "preflighting",
            Stage::Uploading => "uploading",
            Stage::RemoteExecuting => "remote_executing",
            Stage::Filing => "filing",
        };
        f.write_str(s)
    }
}

/// Counts of files filed since the loop started.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub processed: usize,
    pub failed: usize,
}

impl RunReport {
    fn record(&mut self, outcome: Outcome) {
        if outcome.is_success() {
            self.processed += 1;
        } else {
            self.failed += 1;
        }
    }
}

pub struct Pipeline<T, P, C> {
    config: Arc<AgentConfig>,
    transport: T,
    probe: P,
    clock: C,
    filer: OutcomeFiler,
}

impl<T, P, C> Pipeline<T, P, C>
where
    T: RemoteTransport,
    P: ReachabilityProbe,
    C: Clock,
{
    pub fn new(config: Arc<AgentConfig>, transport: T, probe: P, clock: C) -> Self {
        let filer = OutcomeFiler::new(&config.agent.processed_dir, &config.agent.failed_dir);
        Self {
            config,
            transport,
            probe,
            clock,
            filer,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Process events until `shutdown` resolves or the event source closes.
    /// A file already in flight is always finished first.
    pub async fn run_until<F>(&self, mut events: mpsc::Receiver<WatchEvent>, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        info!(watch_dir = %self.config.agent.watch_dir.display(), "Pipeline waiting for documents");
        let mut report = RunReport::default();
        tokio::pin!(shutdown);

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Event source closed");
                        break;
                    }
                },
            };
            if let Some(outcome) = self.handle_event(event).await {
                report.record(outcome);
            }
        }

        info!(processed = report.processed, failed = report.failed, "Pipeline stopped");
        report
    }

    /// Filter, settle and process one event. `None` means the event was
    /// ignored or the file vanished before processing began.
    pub async fn handle_event(&self, event: WatchEvent) -> Option<Outcome> {
        if !is_candidate(&event, &self.config.agent.extension) {
            return None;
        }
        let file = event
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(%file, kind = ?event.kind, "Detected new file");

        match wait_until_settled(&event.path, &self.config.agent.settle).await {
            Readiness::Stable => {}
            Readiness::Unstable => {
                warn!(%file, stage = %Stage::Settling, "File size still changing; processing anyway")
            }
            Readiness::Vanished => {
                warn!(%file, stage = %Stage::Settling, "File disappeared before processing; skipping");
                return None;
            }
        }

        Some(self.process(&event.path).await)
    }

    /// Run every stage for `source`, file it, and remove the artifact.
    pub async fn process(&self, source: &Path) -> Outcome {
        let file = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let span = info_span!("document", %file);

        async {
            let mut artifact = None;
            let outcome = match self.run_stages(source, &mut artifact).await {
                Ok(()) => Outcome::Success,
                Err(e) => {
                    error!(error = %e, "Processing failed");
                    e.outcome()
                }
            };

            info!(stage = %Stage::Filing, %outcome, "Filing document");
            self.filer.file_outcome(source, outcome);

            if let Some(artifact) = artifact.take() {
                artifact.remove();
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        source: &Path,
        artifact_slot: &mut Option<EnrichedArtifact>,
    ) -> Result<(), PipelineError> {
        let agent = &self.config.agent;
        let remote = &self.config.remote;
        let today = self.clock.today();

        info!(stage = %Stage::Enriching);
        let artifact = artifact_slot.insert(enrich(source, &agent.author, today, &agent.work_dir())?);

        info!(stage = %Stage::Preflighting, host = %remote.host, port = remote.port);
        if !self
            .probe
            .reachable(&remote.host, remote.port, remote.connect_timeout())
            .await
        {
            return Err(PipelineError::PreflightUnreachable {
                host: remote.host.clone(),
                port: remote.port,
            });
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote_path = remote_path_for(&remote.upload_dir, &date_stamp(today), &file_name);
        let delivery = Delivery::new(&self.transport, remote);

        info!(stage = %Stage::Uploading, %remote_path);
        delivery.upload(artifact.path(), &remote_path).await?;

        info!(stage = %Stage::RemoteExecuting, command = %remote.build_command);
        delivery.execute(&remote.build_command).await?;

        Ok(())
    }
}
