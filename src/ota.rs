use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::UpdateError;

const SLOT_STATE_FILE: &str = "slot_state.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The image is in place and takes effect on the next boot.
    Installed { slot: String, bytes: usize },
}

#[async_trait]
pub trait UpdateFetcher: Send {
    async fn fetch(&mut self, url: &str) -> Result<UpdateOutcome, UpdateError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SlotState {
    pub active_slot: String,
    pub source_url: Option<String>,
}

impl Default for SlotState {
    fn default() -> Self {
        Self {
            active_slot: "A".to_string(),
            source_url: None,
        }
    }
}

impl SlotState {
    pub fn load(dir: &Path) -> Result<Self, UpdateError> {
        let path = dir.join(SLOT_STATE_FILE);
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, dir: &Path) -> Result<(), UpdateError> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(SLOT_STATE_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn inactive_slot(&self) -> &'static str {
        if self.active_slot == "A" {
            "B"
        } else {
            "A"
        }
    }
}

/// Downloads images over HTTP into the inactive slot of an A/B pair.
pub struct HttpUpdateFetcher {
    client: Client,
    dir: PathBuf,
}

impl HttpUpdateFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            dir: dir.into(),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        info!(url, "Downloading update image");
        let response = self.client.get(url).send().await?;
        let bytes = response.error_for_status()?.bytes().await?.to_vec();
        info!(bytes = bytes.len(), "Update image downloaded");
        Ok(bytes)
    }
}

/// Writes `image` to the inactive slot under `dir` and makes it active.
pub fn install_image(dir: &Path, url: &str, image: &[u8]) -> Result<UpdateOutcome, UpdateError> {
    if image.is_empty() {
        return Err(UpdateError::EmptyImage);
    }
    let mut state = SlotState::load(dir)?;
    let slot = state.inactive_slot();
    fs::create_dir_all(dir)?;
    fs::write(dir.join(format!("slot_{slot}.bin")), image)?;

    state.active_slot = slot.to_string();
    state.source_url = Some(url.to_string());
    state.save(dir)?;
    info!(slot, "Update installed; active on next boot");
    Ok(UpdateOutcome::Installed {
        slot: slot.to_string(),
        bytes: image.len(),
    })
}

#[async_trait]
impl UpdateFetcher for HttpUpdateFetcher {
    async fn fetch(&mut self, url: &str) -> Result<UpdateOutcome, UpdateError> {
        let image = self.download(url).await?;
        install_image(&self.dir, url, &image)
    }
}
