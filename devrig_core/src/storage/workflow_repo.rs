use rusqlite::{params, OptionalExtension};

use super::conn::Storage;
use super::error::Result;
use super::models::{
    new_id, now_ms, Execution, ExecutionStatus, ExecutionStep, FlowEdge, FlowNode, Workflow,
    Workspace,
};

impl Storage {
    pub async fn workspace_insert(&self, name: String) -> Result<Workspace> {
        let ts = now_ms();
        let workspace = Workspace {
            id: new_id(),
            name,
            created_at: ts,
            updated_at: ts,
        };
        let row = workspace.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO workspaces (id, name, created_at, updated_at) VALUES (?1,?2,?3,?4)",
                params![row.id, row.name, row.created_at, row.updated_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(workspace)
    }

    pub async fn workflow_insert(&self, workspace_id: String, name: String, enabled: bool) -> Result<Workflow> {
        let ts = now_ms();
        let workflow = Workflow {
            id: new_id(),
            workspace_id,
            name,
            enabled,
            created_at: ts,
            updated_at: ts,
        };
        let row = workflow.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO workflows (id, workspace_id, name, enabled, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![row.id, row.workspace_id, row.name, row.enabled as i64, row.created_at, row.updated_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(workflow)
    }

    pub async fn workflow_list_enabled(&self) -> Result<Vec<Workflow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, workspace_id, name, enabled, created_at, updated_at
                 FROM workflows WHERE enabled = 1",
            )?;
            let rows = stmt.query_map([], row_to_workflow)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Bulk-replace a workflow's nodes and edges inside one transaction,
    /// as spec.md §4.A requires for workflow node/edge bulk writes.
    pub async fn workflow_replace_graph(
        &self,
        workflow_id: String,
        nodes: Vec<FlowNode>,
        edges: Vec<FlowEdge>,
    ) -> Result<()> {
        self.with_conn_mut(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM flow_edges WHERE workflow_id = ?1",
                params![workflow_id],
            )?;
            tx.execute(
                "DELETE FROM flow_nodes WHERE workflow_id = ?1",
                params![workflow_id],
            )?;
            for node in &nodes {
                tx.execute(
                    "INSERT INTO flow_nodes (id, workflow_id, node_type, config) VALUES (?1,?2,?3,?4)",
                    params![node.id, node.workflow_id, node.node_type, node.config.to_string()],
                )?;
            }
            for edge in &edges {
                tx.execute(
                    "INSERT INTO flow_edges (id, workflow_id, source_node_id, target_node_id)
                     VALUES (?1,?2,?3,?4)",
                    params![edge.id, edge.workflow_id, edge.source_node_id, edge.target_node_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Trigger-type nodes across every non-disabled workflow, used by
    /// `TriggerScheduler::refresh_jobs`.
    pub async fn flow_nodes_trigger_for_enabled_workflows(&self) -> Result<Vec<FlowNode>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT n.id, n.workflow_id, n.node_type, n.config
                 FROM flow_nodes n JOIN workflows w ON w.id = n.workflow_id
                 WHERE w.enabled = 1 AND n.node_type = 'trigger'",
            )?;
            let rows = stmt.query_map([], |row| {
                let config: String = row.get(3)?;
                Ok(FlowNode {
                    id: row.get(0)?,
                    workflow_id: row.get(1)?,
                    node_type: row.get(2)?,
                    config: serde_json::from_str(&config).unwrap_or(serde_json::json!({})),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    pub async fn execution_insert(&self, workflow_id: String, trigger_kind: String) -> Result<Execution> {
        let ts = now_ms();
        let execution = Execution {
            id: new_id(),
            workflow_id,
            trigger_kind,
            status: ExecutionStatus::Running,
            started_at: ts,
            finished_at: None,
            error: None,
        };
        let row = execution.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO executions (id, workflow_id, trigger_kind, status, started_at)
                 VALUES (?1,?2,?3,?4,?5)",
                params![row.id, row.workflow_id, row.trigger_kind, row.status.as_str(), row.started_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(execution)
    }

    pub async fn execution_finish(
        &self,
        id: String,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let ts = now_ms();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE executions SET status = ?1, error = ?2, finished_at = ?3 WHERE id = ?4",
                params![status.as_str(), error, ts, id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn execution_step_insert(
        &self,
        execution_id: String,
        node_id: String,
    ) -> Result<ExecutionStep> {
        let ts = now_ms();
        let step = ExecutionStep {
            id: new_id(),
            execution_id,
            node_id,
            status: ExecutionStatus::Running,
            output: None,
            started_at: ts,
            finished_at: None,
            error: None,
        };
        let row = step.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO execution_steps (id, execution_id, node_id, status, started_at)
                 VALUES (?1,?2,?3,?4,?5)",
                params![row.id, row.execution_id, row.node_id, row.status.as_str(), row.started_at],
            )?;
            Ok(())
        })
        .await?;
        Ok(step)
    }

    pub async fn execution_get(&self, id: &str) -> Result<Option<Execution>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, workflow_id, trigger_kind, status, started_at, finished_at, error
                     FROM executions WHERE id = ?1",
                    params![id],
                    row_to_execution,
                )
                .optional()?)
        })
        .await
    }
}

fn row_to_workflow(row: &rusqlite::Row) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<Execution> {
    let status: String = row.get(3)?;
    Ok(Execution {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        trigger_kind: row.get(2)?,
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Running),
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
        error: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn edges_cascade_when_node_removed() {
        let storage = Storage::open_in_memory().await.unwrap();
        let ws = storage.workspace_insert("default".into()).await.unwrap();
        let wf = storage
            .workflow_insert(ws.id.clone(), "daily digest".into(), true)
            .await
            .unwrap();

        let n1 = FlowNode {
            id: new_id(),
            workflow_id: wf.id.clone(),
            node_type: "trigger".into(),
            config: serde_json::json!({"triggerType": "schedule", "schedule": {"intervalValue": 5, "intervalUnit": "minutes"}}),
        };
        let n2 = FlowNode {
            id: new_id(),
            workflow_id: wf.id.clone(),
            node_type: "action".into(),
            config: serde_json::json!({}),
        };
        let edge = FlowEdge {
            id: new_id(),
            workflow_id: wf.id.clone(),
            source_node_id: n1.id.clone(),
            target_node_id: n2.id.clone(),
        };

        storage
            .workflow_replace_graph(wf.id.clone(), vec![n1.clone(), n2], vec![edge])
            .await
            .unwrap();

        // Replacing with only n1 drops n2 and its edge.
        storage
            .workflow_replace_graph(wf.id.clone(), vec![n1], vec![])
            .await
            .unwrap();

        let triggers = storage.flow_nodes_trigger_for_enabled_workflows().await.unwrap();
        assert_eq!(triggers.len(), 1);
    }
}
