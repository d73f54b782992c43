//! Reconciliation: converge the graph toward what a plugin just reported.
//!
//! Every mutation of an entity is preceded by an existence check on the same
//! entity, under that entity's identity lock. The only unguarded write is the
//! subject update of `properties` plugins, which never creates anything.

use std::sync::Arc;

use serde::Serialize;

use fleetgraph_core::plugin::{PresencePlugin, PropertiesPlugin, RelationPlugin};
use fleetgraph_core::template::{self, TemplateError};
use fleetgraph_core::{Node, PluginDescriptor, PluginKind, Relationship};
use fleetgraph_graph::{Deletable, GraphEntity, GraphStore};

use crate::error::Result;
use crate::locks::IdentityLocks;

/// Counts of what one reconciliation did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub rows_seen: u32,
    pub rows_skipped: u32,
    pub nodes_created: u32,
    pub nodes_updated: u32,
    pub relationships_created: u32,
    pub relationships_updated: u32,
    pub relationships_deleted: u32,
}

impl ReconcileSummary {
    pub fn merge(&mut self, other: &Self) {
        self.rows_seen += other.rows_seen;
        self.rows_skipped += other.rows_skipped;
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.relationships_created += other.relationships_created;
        self.relationships_updated += other.relationships_updated;
        self.relationships_deleted += other.relationships_deleted;
    }

    /// Total write statements issued.
    pub fn mutations(&self) -> u32 {
        self.nodes_created
            + self.nodes_updated
            + self.relationships_created
            + self.relationships_updated
            + self.relationships_deleted
    }
}

pub struct Reconciler {
    store: Arc<dyn GraphStore>,
    locks: Arc<IdentityLocks>,
    delimiter: char,
}

impl Reconciler {
    pub fn new(store: Arc<dyn GraphStore>, locks: Arc<IdentityLocks>, delimiter: char) -> Self {
        Self {
            store,
            locks,
            delimiter,
        }
    }

    /// Create the subject server node, or refresh it if it already exists.
    pub async fn sync_subject(&self, subject: &Node) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        self.reconcile_node(subject, true, true, &mut summary).await?;
        Ok(summary)
    }

    /// Apply one plugin's output. `subject` carries enrichments from
    /// `properties` plugins into later plugins for the same server.
    pub async fn apply(
        &self,
        subject: &mut Node,
        plugin: &PluginDescriptor,
        output: &str,
    ) -> Result<ReconcileSummary> {
        match &plugin.kind {
            PluginKind::Properties(p) => self.apply_properties(subject, p, output).await,
            PluginKind::Relation(p) => self.apply_relation(subject, p, output).await,
            PluginKind::Presence(p) => self.apply_presence(subject, p, output).await,
        }
    }

    /// Assign resolved properties to the subject and update it, row by row.
    pub async fn apply_properties(
        &self,
        subject: &mut Node,
        plugin: &PropertiesPlugin,
        output: &str,
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        for row in template::rows(output, self.delimiter) {
            summary.rows_seen += 1;
            let resolved = match template::resolve_properties(&plugin.node_params, &row.fields) {
                Ok(props) => props,
                Err(e) => {
                    skip_row(row.line, &e, &mut summary);
                    continue;
                }
            };
            subject.properties.extend(resolved);

            let _guard = self.locks.lock(&subject.identity_key()).await;
            tracing::info!(class = %subject.class, name = %subject.name, "Update node");
            subject.update(self.store.as_ref()).await?;
            summary.nodes_updated += 1;
        }

        Ok(summary)
    }

    /// Reconcile both endpoints and the edge between them, row by row.
    pub async fn apply_relation(
        &self,
        subject: &Node,
        plugin: &RelationPlugin,
        output: &str,
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        for row in template::rows(output, self.delimiter) {
            summary.rows_seen += 1;
            let rel = match build_relationship(subject, plugin, &row.fields) {
                Ok(rel) => rel,
                Err(e) => {
                    skip_row(row.line, &e, &mut summary);
                    continue;
                }
            };

            self.reconcile_node(
                &rel.left,
                plugin.enable_node_creation,
                plugin.enable_node_update,
                &mut summary,
            )
            .await?;
            self.reconcile_node(
                &rel.right,
                plugin.enable_node_creation,
                plugin.enable_node_update,
                &mut summary,
            )
            .await?;

            let _guard = self.locks.lock(&rel.identity_key()).await;
            let store = self.store.as_ref();
            if !rel.exists(store).await? {
                if plugin.enable_relation_delete {
                    log_relationship("Delete relation", &rel);
                    rel.delete(store).await?;
                    summary.relationships_deleted += 1;
                } else {
                    log_relationship("Add relation", &rel);
                    rel.add(store).await?;
                    summary.relationships_created += 1;
                }
            } else if plugin.enable_relation_update && !rel.properties.is_empty() {
                log_relationship("Update relation", &rel);
                rel.update(store).await?;
                summary.relationships_updated += 1;
            }
        }

        Ok(summary)
    }

    /// Link or unlink the subject and a fixed node depending on the check script's
    /// answer.
    pub async fn apply_presence(
        &self,
        subject: &Node,
        plugin: &PresencePlugin,
        output: &str,
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary {
            rows_seen: 1,
            ..Default::default()
        };

        let target = plugin.node();
        tracing::info!(class = %target.class, name = %target.name, "Target node");
        self.reconcile_node(&target, true, false, &mut summary).await?;

        let rel = Relationship::new(subject.clone(), plugin.check.relation.as_str(), target);
        let answer = output.trim();
        tracing::info!(result = %answer, "Script result");

        let _guard = self.locks.lock(&rel.identity_key()).await;
        let store = self.store.as_ref();
        let found = rel.exists(store).await?;
        if answer == plugin.check.truevalue && !found {
            log_relationship("Add relation", &rel);
            rel.add(store).await?;
            summary.relationships_created += 1;
        } else if answer == plugin.check.falsevalue && found {
            log_relationship("Remove relation", &rel);
            rel.delete(store).await?;
            summary.relationships_deleted += 1;
        }

        Ok(summary)
    }

    /// Exists, then add or update as allowed.
    async fn reconcile_node(
        &self,
        node: &Node,
        create: bool,
        update: bool,
        summary: &mut ReconcileSummary,
    ) -> Result<()> {
        let _guard = self.locks.lock(&node.identity_key()).await;
        let store = self.store.as_ref();
        let found = node.exists(store).await?;

        if !found && create {
            tracing::info!(class = %node.class, name = %node.name, "Add node");
            node.add(store).await?;
            summary.nodes_created += 1;
        } else if found && update {
            tracing::info!(class = %node.class, name = %node.name, "Update node");
            node.update(store).await?;
            summary.nodes_updated += 1;
        }
        Ok(())
    }
}

/// Resolve one row into `(left)-[rel]->(right)`.
///
/// Without a left template the left endpoint is a copy of the subject.
pub fn build_relationship(
    subject: &Node,
    plugin: &RelationPlugin,
    fields: &[&str],
) -> std::result::Result<Relationship, TemplateError> {
    let left = match &plugin.left {
        Some(left) => left.resolve(fields)?,
        None => subject.clone(),
    };
    Ok(Relationship {
        left,
        class: plugin.rel_name.clone(),
        right: plugin.right.resolve(fields)?,
        properties: template::resolve_properties(&plugin.rel_params, fields)?,
    })
}

fn skip_row(line: usize, error: &TemplateError, summary: &mut ReconcileSummary) {
    tracing::warn!(line, error = %error, "Skipping row");
    summary.rows_skipped += 1;
}

fn log_relationship(action: &str, rel: &Relationship) {
    tracing::info!(
        relation = %rel.class,
        left_class = %rel.left.class,
        left = %rel.left.name,
        right_class = %rel.right.class,
        right = %rel.right.name,
        "{action}"
    );
}
