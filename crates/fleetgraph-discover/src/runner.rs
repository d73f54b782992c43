//! Discovery driver.
//!
//! Spawns one tokio task per server. A semaphore bounds how many servers are
//! discovered at once; within a server, plugins and rows run in order.
//!
//! Failure scopes: a script that fails skips that plugin, an unreachable
//! server or a store failure ends that server's discovery. Other servers
//! always continue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use fleetgraph_core::PluginDescriptor;

use crate::error::Result;
use crate::executor::RemoteExecutor;
use crate::inventory::ServerEntry;
use crate::reconcile::{ReconcileSummary, Reconciler};

/// Outcome of one discovery run over the whole inventory.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub servers_total: usize,
    pub servers_ok: usize,
    pub servers_failed: usize,
    pub plugins_failed: usize,
    pub totals: ReconcileSummary,
}

/// Outcome of one server whose discovery ran to the end.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerReport {
    pub summary: ReconcileSummary,
    pub plugins_failed: usize,
}

pub struct FleetRunner {
    executor: Arc<dyn RemoteExecutor>,
    reconciler: Arc<Reconciler>,
    plugins: Arc<Vec<PluginDescriptor>>,
    subject_class: String,
    concurrency: Arc<Semaphore>,
}

impl FleetRunner {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        reconciler: Arc<Reconciler>,
        plugins: Vec<PluginDescriptor>,
        subject_class: impl Into<String>,
        max_concurrent_servers: usize,
    ) -> Self {
        Self {
            executor,
            reconciler,
            plugins: Arc::new(plugins),
            subject_class: subject_class.into(),
            concurrency: Arc::new(Semaphore::new(max_concurrent_servers.max(1))),
        }
    }

    /// Discover every server once and wait for all of them.
    pub async fn run(&self, servers: Vec<ServerEntry>) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let servers_total = servers.len();
        tracing::info!(
            %run_id,
            servers = servers_total,
            plugins = self.plugins.len(),
            "Discovery run started"
        );

        let mut handles = Vec::with_capacity(servers_total);
        for server in servers {
            let permit = self.concurrency.clone().acquire_owned().await?;
            let executor = self.executor.clone();
            let reconciler = self.reconciler.clone();
            let plugins = self.plugins.clone();
            let subject_class = self.subject_class.clone();
            let span = tracing::info_span!("server", server = %server.vm_name, ip = %server.ip);

            let handle = tokio::spawn(
                async move {
                    let _permit = permit;
                    let result = discover_server(
                        executor.as_ref(),
                        &reconciler,
                        &plugins,
                        &subject_class,
                        &server,
                    )
                    .await;
                    (server, result)
                }
                .instrument(span),
            );
            handles.push(handle);
        }

        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: started_at,
            servers_total,
            servers_ok: 0,
            servers_failed: 0,
            plugins_failed: 0,
            totals: ReconcileSummary::default(),
        };

        for handle in handles {
            match handle.await {
                Ok((_, Ok(report))) => {
                    summary.servers_ok += 1;
                    summary.plugins_failed += report.plugins_failed;
                    summary.totals.merge(&report.summary);
                }
                Ok((server, Err(e))) => {
                    summary.servers_failed += 1;
                    tracing::error!(server = %server.vm_name, ip = %server.ip, error = %e, "Server discovery failed");
                }
                Err(e) => {
                    summary.servers_failed += 1;
                    tracing::error!(error = %e, "Server discovery task panicked");
                }
            }
        }

        summary.finished_at = Utc::now();
        tracing::info!(
            %run_id,
            servers_ok = summary.servers_ok,
            servers_failed = summary.servers_failed,
            plugins_failed = summary.plugins_failed,
            mutations = summary.totals.mutations(),
            duration_ms = (summary.finished_at - started_at).num_milliseconds(),
            "Discovery run complete"
        );
        Ok(summary)
    }
}

/// Sync the subject node, then run every plugin against the server.
pub async fn discover_server(
    executor: &dyn RemoteExecutor,
    reconciler: &Reconciler,
    plugins: &[PluginDescriptor],
    subject_class: &str,
    server: &ServerEntry,
) -> Result<ServerReport> {
    let mut subject = server.subject_node(subject_class);
    let mut report = ServerReport {
        summary: reconciler.sync_subject(&subject).await?,
        plugins_failed: 0,
    };

    executor.connect(server).await?;

    for plugin in plugins {
        let span = tracing::info_span!("plugin", plugin = %plugin.name, mode = plugin.mode());

        let output = match executor
            .run_script(server, plugin.script())
            .instrument(span.clone())
            .await
        {
            Ok(output) => output,
            Err(e) => {
                span.in_scope(|| tracing::warn!(error = %e, "Plugin failed, skipping"));
                report.plugins_failed += 1;
                continue;
            }
        };

        let summary = reconciler
            .apply(&mut subject, plugin, &output)
            .instrument(span)
            .await?;
        report.summary.merge(&summary);
    }

    Ok(report)
}
