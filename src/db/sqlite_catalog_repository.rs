use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::{
    db::catalog_repository::CatalogRepository,
    models::{
        agent::{Agent, CreateAgent},
        llm_model::{CreateLlmModel, LlmModel},
        prompt::{CreatePrompt, Prompt},
        tool::{CreateTool, Tool},
        workflow::{CreateWorkflow, Workflow, WorkflowConnection, WorkflowNode},
    },
};

const MODEL_COLUMNS: &str =
    "id, name, provider, model_name, endpoint, parameters, cost_per_token, is_active";
const PROMPT_COLUMNS: &str =
    "id, name, description, template, input_schema, output_schema, version, is_active";
const TOOL_COLUMNS: &str = "id, name, description, tool_type, implementation, parameters_schema, output_schema, is_active";
const AGENT_COLUMNS: &str =
    "id, name, description, model_id, prompt_id, parameters, memory_config, is_active";
const WORKFLOW_COLUMNS: &str = "id, name, description, definition, is_active";

pub struct SqliteCatalogRepository {
    pub pool: SqlitePool,
}

impl SqliteCatalogRepository {
    async fn load_agent_tools(&self, agent: &mut Agent) -> Result<(), sqlx::Error> {
        agent.tools = sqlx::query_as::<_, Tool>(
            r#"
            SELECT t.id, t.name, t.description, t.tool_type, t.implementation,
                   t.parameters_schema, t.output_schema, t.is_active
            FROM tools t
            JOIN agent_tools at ON at.tool_id = t.id
            WHERE at.agent_id = ?
            ORDER BY at.position, t.id
            "#,
        )
        .bind(agent.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_workflow_graph(&self, workflow: &mut Workflow) -> Result<(), sqlx::Error> {
        workflow.nodes = sqlx::query_as::<_, WorkflowNode>(
            r#"
            SELECT node_id, node_type, position_x, position_y, configuration
            FROM workflow_nodes
            WHERE workflow_id = ?
            ORDER BY id
            "#,
        )
        .bind(workflow.id)
        .fetch_all(&self.pool)
        .await?;

        workflow.connections = sqlx::query_as::<_, WorkflowConnection>(
            r#"
            SELECT source_node_id, target_node_id, source_handle, target_handle
            FROM workflow_connections
            WHERE workflow_id = ?
            ORDER BY id
            "#,
        )
        .bind(workflow.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn create_model(&self, new_model: CreateLlmModel) -> Result<LlmModel, sqlx::Error> {
        sqlx::query_as::<_, LlmModel>(&format!(
            r#"
            INSERT INTO llm_models (name, provider, model_name, endpoint, parameters, cost_per_token)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {MODEL_COLUMNS}
            "#
        ))
        .bind(new_model.name)
        .bind(new_model.provider)
        .bind(new_model.model_name)
        .bind(new_model.endpoint)
        .bind(new_model.parameters)
        .bind(new_model.cost_per_token)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_model(&self, id: i64) -> Result<Option<LlmModel>, sqlx::Error> {
        sqlx::query_as::<_, LlmModel>(&format!(
            "SELECT {MODEL_COLUMNS} FROM llm_models WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_prompt(&self, new_prompt: CreatePrompt) -> Result<Prompt, sqlx::Error> {
        sqlx::query_as::<_, Prompt>(&format!(
            r#"
            INSERT INTO prompts (name, description, template, input_schema, output_schema)
            VALUES (?, ?, ?, ?, ?)
            RETURNING {PROMPT_COLUMNS}
            "#
        ))
        .bind(new_prompt.name)
        .bind(new_prompt.description)
        .bind(new_prompt.template)
        .bind(new_prompt.input_schema)
        .bind(new_prompt.output_schema)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_prompt(&self, id: i64) -> Result<Option<Prompt>, sqlx::Error> {
        sqlx::query_as::<_, Prompt>(&format!(
            "SELECT {PROMPT_COLUMNS} FROM prompts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_tool(&self, new_tool: CreateTool) -> Result<Tool, sqlx::Error> {
        sqlx::query_as::<_, Tool>(&format!(
            r#"
            INSERT INTO tools (name, description, tool_type, implementation, parameters_schema, output_schema)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {TOOL_COLUMNS}
            "#
        ))
        .bind(new_tool.name)
        .bind(new_tool.description)
        .bind(new_tool.tool_type)
        .bind(new_tool.implementation)
        .bind(new_tool.parameters_schema)
        .bind(new_tool.output_schema)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_tool(&self, id: i64) -> Result<Option<Tool>, sqlx::Error> {
        sqlx::query_as::<_, Tool>(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_tool_by_name(&self, name: &str) -> Result<Option<Tool>, sqlx::Error> {
        sqlx::query_as::<_, Tool>(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_agent(&self, new_agent: CreateAgent) -> Result<Agent, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut agent = sqlx::query_as::<_, Agent>(&format!(
            r#"
            INSERT INTO agents (name, description, model_id, prompt_id, parameters, memory_config)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(new_agent.name)
        .bind(new_agent.description)
        .bind(new_agent.model_id)
        .bind(new_agent.prompt_id)
        .bind(new_agent.parameters)
        .bind(new_agent.memory_config)
        .fetch_one(&mut *tx)
        .await?;

        for (position, tool_id) in new_agent.tool_ids.iter().enumerate() {
            sqlx::query("INSERT INTO agent_tools (agent_id, tool_id, position) VALUES (?, ?, ?)")
                .bind(agent.id)
                .bind(tool_id)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.load_agent_tools(&mut agent).await?;
        Ok(agent)
    }

    async fn find_agent(&self, id: i64) -> Result<Option<Agent>, sqlx::Error> {
        let agent = sqlx::query_as::<_, Agent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match agent {
            Some(mut agent) => {
                self.load_agent_tools(&mut agent).await?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<Agent>, sqlx::Error> {
        let agent = sqlx::query_as::<_, Agent>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match agent {
            Some(mut agent) => {
                self.load_agent_tools(&mut agent).await?;
                Ok(Some(agent))
            }
            None => Ok(None),
        }
    }

    async fn create_workflow(
        &self,
        new_workflow: CreateWorkflow,
    ) -> Result<Workflow, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut workflow = sqlx::query_as::<_, Workflow>(&format!(
            r#"
            INSERT INTO workflows (name, description, definition)
            VALUES (?, ?, ?)
            RETURNING {WORKFLOW_COLUMNS}
            "#
        ))
        .bind(new_workflow.name)
        .bind(new_workflow.description)
        .bind(new_workflow.definition)
        .fetch_one(&mut *tx)
        .await?;

        for node in &new_workflow.nodes {
            sqlx::query(
                r#"
                INSERT INTO workflow_nodes (workflow_id, node_id, node_type, position_x, position_y, configuration)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(workflow.id)
            .bind(&node.node_id)
            .bind(&node.node_type)
            .bind(node.position_x)
            .bind(node.position_y)
            .bind(&node.configuration)
            .execute(&mut *tx)
            .await?;
        }

        for connection in &new_workflow.connections {
            sqlx::query(
                r#"
                INSERT INTO workflow_connections (workflow_id, source_node_id, target_node_id, source_handle, target_handle)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(workflow.id)
            .bind(&connection.source_node_id)
            .bind(&connection.target_node_id)
            .bind(&connection.source_handle)
            .bind(&connection.target_handle)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        workflow.nodes = new_workflow.nodes;
        workflow.connections = new_workflow.connections;
        Ok(workflow)
    }

    async fn find_workflow(&self, id: i64) -> Result<Option<Workflow>, sqlx::Error> {
        let workflow = sqlx::query_as::<_, Workflow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match workflow {
            Some(mut workflow) => {
                self.load_workflow_graph(&mut workflow).await?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>, sqlx::Error> {
        let workflow = sqlx::query_as::<_, Workflow>(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match workflow {
            Some(mut workflow) => {
                self.load_workflow_graph(&mut workflow).await?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::workflow::{NODE_AGENT, NODE_END, NODE_START};
    use serde_json::json;

    #[tokio::test]
    async fn agent_round_trips_with_ordered_tools() {
        let repo = SqliteCatalogRepository {
            pool: test_pool().await,
        };

        let model = repo
            .create_model(CreateLlmModel {
                name: "gpt".into(),
                provider: "azure_openai".into(),
                model_name: "gpt-4o".into(),
                endpoint: None,
                parameters: json!({"temperature": 0.2}),
                cost_per_token: 0.00002,
            })
            .await
            .unwrap();
        let prompt = repo
            .create_prompt(CreatePrompt {
                name: "p".into(),
                description: None,
                template: "Summarize {topic}".into(),
                input_schema: None,
                output_schema: None,
            })
            .await
            .unwrap();
        let calculator = repo.find_tool_by_name("calculator").await.unwrap().unwrap();
        let search = repo.find_tool_by_name("web_search").await.unwrap().unwrap();

        let created = repo
            .create_agent(CreateAgent {
                name: "researcher".into(),
                description: None,
                model_id: model.id,
                prompt_id: prompt.id,
                parameters: json!({"max_iterations": 3}),
                memory_config: None,
                tool_ids: vec![calculator.id, search.id],
            })
            .await
            .unwrap();

        let loaded = repo.find_agent(created.id).await.unwrap().unwrap();
        let names: Vec<_> = loaded.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["calculator", "web_search"]);
        assert_eq!(loaded.max_iterations(), 3);
        assert_eq!(
            repo.find_model(model.id).await.unwrap().unwrap().parameters["temperature"],
            json!(0.2)
        );
        assert!(repo.find_agent(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn workflow_graph_preserves_insertion_order() {
        let repo = SqliteCatalogRepository {
            pool: test_pool().await,
        };

        let created = repo
            .create_workflow(CreateWorkflow {
                name: "flow".into(),
                description: None,
                definition: json!({}),
                nodes: vec![
                    WorkflowNode::new("s", NODE_START, json!({})),
                    WorkflowNode::new("a", NODE_AGENT, json!({"agent_id": 1})),
                    WorkflowNode::new("e", NODE_END, json!({})),
                ],
                connections: vec![
                    WorkflowConnection::new("s", "a"),
                    WorkflowConnection::new("a", "e"),
                ],
            })
            .await
            .unwrap();

        let loaded = repo
            .find_workflow_by_name("flow")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, created.id);
        let ids: Vec<_> = loaded.nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, vec!["s", "a", "e"]);
        assert_eq!(loaded.connections[1].source_node_id, "a");
        assert_eq!(loaded.nodes[1].configuration["agent_id"], json!(1));
    }
}
