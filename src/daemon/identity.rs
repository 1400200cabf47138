//! Node identity and cluster membership, persisted to the user-data
//! directory on `init`/`join` and reloaded on restart (spec §6.5).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::random_hex_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdentity {
    pub node_id: String,
    pub node_secret: String,
    pub cluster_id: Option<String>,
    pub project_name: Option<String>,
}

impl NodeIdentity {
    pub fn generate(node_id: String) -> Self {
        NodeIdentity {
            node_id,
            node_secret: random_hex_id("secret", 256),
            cluster_id: None,
            project_name: None,
        }
    }

    fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("identity.json")
    }

    /// Loads the persisted identity, or mints and persists a new one if
    /// none exists yet.
    pub fn load_or_create(data_dir: &Path, node_id: impl Into<String>) -> anyhow::Result<Self> {
        let path = Self::path(data_dir);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let identity = NodeIdentity::generate(node_id.into());
                identity.persist(data_dir)?;
                Ok(identity)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn persist(&self, data_dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let path = Self::path(data_dir);
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `init`: mints a fresh cluster id and invite token for this project.
    pub fn init_cluster(&mut self, project_name: String) -> String {
        let cluster_id = random_hex_id("cluster", 64);
        let invite_token = format!("{cluster_id}.{}", random_hex_id("invite", 64));
        self.cluster_id = Some(cluster_id);
        self.project_name = Some(project_name);
        invite_token
    }

    /// `join`: adopts the cluster named by an invite token minted by
    /// `init_cluster` elsewhere.
    pub fn join_cluster(&mut self, token: &str) -> anyhow::Result<()> {
        let cluster_id = token
            .split_once('.')
            .map(|(id, _)| id.to_string())
            .ok_or_else(|| anyhow::anyhow!("malformed invite token"))?;
        self.cluster_id = Some(cluster_id);
        Ok(())
    }
}
