use std::{collections::HashMap, sync::RwLock};

use crate::error::{Result, SignerError};

/// PINs of activated tokens, keyed by token id.
///
/// Filled on successful activation and cleared on deactivation.
#[derive(Debug, Default)]
pub struct PasswordStore {
    passwords: RwLock<HashMap<String, String>>,
}

impl PasswordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token_id: &str) -> Result<Option<String>> {
        let passwords = self
            .passwords
            .read()
            .map_err(|e| SignerError::internal(format!("Password store lock poisoned: {}", e)))?;
        Ok(passwords.get(token_id).cloned())
    }

    pub fn set(&self, token_id: &str, password: Option<&str>) -> Result<()> {
        let mut passwords = self
            .passwords
            .write()
            .map_err(|e| SignerError::internal(format!("Password store lock poisoned: {}", e)))?;
        match password {
            Some(password) => passwords.insert(token_id.to_string(), password.to_string()),
            None => passwords.remove(token_id),
        };
        Ok(())
    }
}
