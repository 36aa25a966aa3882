use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignerError};

/// Member or subsystem identifier, `INSTANCE/CLASS/CODE[/SUBSYSTEM]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId {
    instance: String,
    member_class: String,
    member_code: String,
    subsystem_code: Option<String>,
}

impl ClientId {
    pub fn member(instance: &str, member_class: &str, member_code: &str) -> Self {
        Self {
            instance: instance.to_string(),
            member_class: member_class.to_string(),
            member_code: member_code.to_string(),
            subsystem_code: None,
        }
    }

    pub fn subsystem(instance: &str, member_class: &str, member_code: &str, subsystem: &str) -> Self {
        Self {
            subsystem_code: Some(subsystem.to_string()),
            ..Self::member(instance, member_class, member_code)
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn member_class(&self) -> &str {
        &self.member_class
    }

    pub fn member_code(&self) -> &str {
        &self.member_code
    }

    pub fn subsystem_code(&self) -> Option<&str> {
        self.subsystem_code.as_deref()
    }

    pub fn is_subsystem(&self) -> bool {
        self.subsystem_code.is_some()
    }

    /// The owning member of a subsystem, or the member itself
    pub fn member_id(&self) -> ClientId {
        Self::member(&self.instance, &self.member_class, &self.member_code)
    }

    /// True when `self` is a subsystem and `member` is its owning member
    pub fn subsystem_contains_member(&self, member: &ClientId) -> bool {
        self.is_subsystem() && !member.is_subsystem() && self.member_id() == *member
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.instance, self.member_class, self.member_code)?;
        if let Some(subsystem) = &self.subsystem_code {
            write!(f, "/{}", subsystem)?;
        }
        Ok(())
    }
}

impl FromStr for ClientId {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        let parts = split_identifier(s)?;
        match parts.as_slice() {
            [instance, class, code] => Ok(Self::member(instance, class, code)),
            [instance, class, code, subsystem] => {
                Ok(Self::subsystem(instance, class, code, subsystem))
            }
            _ => Err(SignerError::invalid_request(format!(
                "Invalid client identifier '{}', expected INSTANCE/CLASS/CODE[/SUBSYSTEM]",
                s
            ))),
        }
    }
}

impl TryFrom<String> for ClientId {
    type Error = SignerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.to_string()
    }
}

/// Security server identifier, `INSTANCE/CLASS/CODE/SERVER`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecurityServerId {
    owner: ClientId,
    server_code: String,
}

impl SecurityServerId {
    pub fn new(owner: ClientId, server_code: &str) -> Self {
        Self {
            owner: owner.member_id(),
            server_code: server_code.to_string(),
        }
    }

    pub fn owner(&self) -> &ClientId {
        &self.owner
    }

    pub fn server_code(&self) -> &str {
        &self.server_code
    }
}

impl fmt::Display for SecurityServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.server_code)
    }
}

impl FromStr for SecurityServerId {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        match split_identifier(s)?.as_slice() {
            [instance, class, code, server] => Ok(Self::new(
                ClientId::member(instance, class, code),
                server,
            )),
            _ => Err(SignerError::invalid_request(format!(
                "Invalid security server identifier '{}', expected INSTANCE/CLASS/CODE/SERVER",
                s
            ))),
        }
    }
}

impl TryFrom<String> for SecurityServerId {
    type Error = SignerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SecurityServerId> for String {
    fn from(id: SecurityServerId) -> Self {
        id.to_string()
    }
}

fn split_identifier(s: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = s.split('/').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(SignerError::invalid_request(format!(
            "Identifier '{}' has an empty component",
            s
        )));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_round_trip() {
        let member: ClientId = "EE/GOV/1234".parse().unwrap();
        assert!(!member.is_subsystem());
        assert_eq!(member.to_string(), "EE/GOV/1234");

        let subsystem: ClientId = "EE/GOV/1234/registry".parse().unwrap();
        assert_eq!(subsystem.subsystem_code(), Some("registry"));
        assert_eq!(subsystem.member_id(), member);

        assert!("EE/GOV".parse::<ClientId>().is_err());
        assert!("EE//1234".parse::<ClientId>().is_err());
    }

    #[test]
    fn test_subsystem_contains_member() {
        let member = ClientId::member("EE", "GOV", "1234");
        let subsystem = ClientId::subsystem("EE", "GOV", "1234", "sub");
        let other = ClientId::member("EE", "GOV", "9999");

        assert!(subsystem.subsystem_contains_member(&member));
        assert!(!subsystem.subsystem_contains_member(&other));
        assert!(!member.subsystem_contains_member(&member));
        assert!(!subsystem.subsystem_contains_member(&subsystem));
    }

    #[test]
    fn test_security_server_id() {
        let id: SecurityServerId = "EE/GOV/1234/ss1".parse().unwrap();
        assert_eq!(id.owner(), &ClientId::member("EE", "GOV", "1234"));
        assert_eq!(id.server_code(), "ss1");
        assert_eq!(id.to_string(), "EE/GOV/1234/ss1");
        assert!("EE/GOV/1234".parse::<SecurityServerId>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = ClientId::subsystem("EE", "COM", "42", "app");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"EE/COM/42/app\"");
        assert_eq!(serde_json::from_str::<ClientId>(&json).unwrap(), id);
        assert!(serde_json::from_str::<ClientId>("\"nope\"").is_err());
    }
}
