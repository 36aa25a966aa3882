use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::RegistryState;
use crate::{error::Result, model::TokenInfo};

/// On-disk key configuration
#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyConf {
    #[serde(default)]
    tokens: Vec<TokenInfo>,
}

/// Write the registry as pretty JSON. Certificates not saved to
/// configuration stay in memory only.
pub fn save_conf(state: &RegistryState, path: &Path) -> Result<()> {
    let mut tokens = state.tokens().to_vec();
    for key in tokens.iter_mut().flat_map(|t| t.keys.iter_mut()) {
        key.certs.retain(|c| c.saved_to_configuration);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&KeyConf { tokens })?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    debug!("Saved key configuration to {}", path.display());
    Ok(())
}

/// Load the key configuration. A missing file is an empty registry; loaded
/// tokens and keys stay inactive and unavailable until their worker reports in.
pub fn load_conf(path: &Path) -> Result<RegistryState> {
    if !path.exists() {
        info!("Key configuration {} not found, starting empty", path.display());
        return Ok(RegistryState::default());
    }

    let conf: KeyConf = serde_json::from_str(&fs::read_to_string(path)?)?;
    let mut tokens = conf.tokens;
    for token in &mut tokens {
        token.active = false;
        token.available = false;
        for key in &mut token.keys {
            key.available = false;
        }
    }

    info!("Loaded {} token(s) from {}", tokens.len(), path.display());
    Ok(RegistryState::new(tokens))
}
