//! The manifest document shape, per spec.md §4.B.

use semver::Version;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub name: String,
    pub version: Version,
    pub description: String,
    pub author: Author,
    pub icon: Option<String>,
    pub homepage: Option<String>,
    pub repository: Option<String>,
    #[serde(rename = "minAppVersion")]
    pub min_app_version: Option<String>,
    #[serde(rename = "maxAppVersion")]
    pub max_app_version: Option<String>,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub permissions: Permissions,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Oauth,
    ApiKey,
    None,
}

impl Default for AuthType {
    fn default() -> Self {
        AuthType::ApiKey
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Auth {
    #[serde(rename = "type", default)]
    pub auth_type: AuthType,
    #[serde(rename = "providerId")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub network: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub ai: bool,
    #[serde(default)]
    pub filesystem: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "dataSources", default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(rename = "aiPipelines", default)]
    pub ai_pipelines: Vec<AiPipeline>,
    #[serde(default)]
    pub views: Vec<View>,
    #[serde(rename = "flowNodes", default)]
    pub flow_nodes: Vec<FlowNodeCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "entryPoint")]
    pub entry_point: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(flatten)]
    pub item: CapabilityItem,
    #[serde(rename = "syncInterval")]
    pub sync_interval: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParam {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub item: CapabilityItem,
    #[serde(default)]
    pub parameters: std::collections::BTreeMap<String, ActionParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AiPipelineTrigger {
    OnNewItems,
    OnAction,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiPipeline {
    #[serde(flatten)]
    pub item: CapabilityItem,
    pub trigger: AiPipelineTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewTarget {
    DetailPanel,
    Settings,
    Dashboard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    #[serde(flatten)]
    pub item: CapabilityItem,
    pub target: ViewTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowNodeType {
    Trigger,
    Action,
    Condition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNodeCapability {
    #[serde(flatten)]
    pub item: CapabilityItem,
    #[serde(rename = "type")]
    pub node_type: FlowNodeType,
}

impl Manifest {
    /// Every declared entry-point path across every capability kind.
    pub fn entry_points(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for ds in &self.capabilities.data_sources {
            out.push(ds.item.entry_point.as_str());
        }
        for a in &self.capabilities.actions {
            out.push(a.item.entry_point.as_str());
        }
        for p in &self.capabilities.ai_pipelines {
            out.push(p.item.entry_point.as_str());
        }
        for v in &self.capabilities.views {
            out.push(v.item.entry_point.as_str());
        }
        for f in &self.capabilities.flow_nodes {
            out.push(f.item.entry_point.as_str());
        }
        out
    }

    pub fn data_source(&self, id: &str) -> Option<&DataSource> {
        self.capabilities.data_sources.iter().find(|d| d.item.id == id)
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.capabilities.actions.iter().find(|a| a.item.id == id)
    }

    pub fn ai_pipeline(&self, id: &str) -> Option<&AiPipeline> {
        self.capabilities.ai_pipelines.iter().find(|p| p.item.id == id)
    }
}
