use time::OffsetDateTime;

use crate::error::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    pub name: String,
    pub subscription: String,
    pub resource_group: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub content_type: Option<String>,
    pub enabled: bool,
    pub created: Option<OffsetDateTime>,
    pub updated: Option<OffsetDateTime>,
    pub id: String,
}

/// One revision of a secret. The value is fetched separately, per version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretVersion {
    pub version: String,
    pub enabled: bool,
    pub created: Option<OffsetDateTime>,
    pub updated: Option<OffsetDateTime>,
    pub content_type: Option<String>,
}

/// Records that can be narrowed by the filter field of their level.
///
/// `needle` is already trimmed and lower-cased and never empty.
pub trait Filterable {
    fn matches(&self, needle: &str) -> bool;
}

impl Filterable for Vault {
    fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.resource_group.to_lowercase().contains(needle)
    }
}

impl Filterable for Secret {
    fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
    }
}

// Versions have no filter field.
impl Filterable for SecretVersion {
    fn matches(&self, _needle: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState<T> {
    Idle,
    Loading,
    Loaded(Vec<T>),
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueState {
    Idle,
    Loading,
    Loaded(String),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget {
    Vaults,
    Secrets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Vaults,
    Secrets,
    Versions,
    Value,
}

impl Pane {
    pub fn next(self) -> Self {
        match self {
            Pane::Vaults => Pane::Secrets,
            Pane::Secrets => Pane::Versions,
            Pane::Versions => Pane::Value,
            Pane::Value => Pane::Vaults,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Pane::Vaults => Pane::Value,
            Pane::Secrets => Pane::Vaults,
            Pane::Versions => Pane::Secrets,
            Pane::Value => Pane::Versions,
        }
    }

    pub fn filter_target(self) -> Option<FilterTarget> {
        match self {
            Pane::Vaults => Some(FilterTarget::Vaults),
            Pane::Secrets => Some(FilterTarget::Secrets),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    NewSecret,
    NewVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Name,
    Value,
    ContentType,
}

/// Input buffers for the add-secret and add-version dialogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretForm {
    pub name: String,
    pub value: String,
    pub content_type: String,
    pub field: FormField,
    pub error: Option<String>,
}

impl SecretForm {
    pub fn new(field: FormField) -> Self {
        Self {
            name: String::new(),
            value: String::new(),
            content_type: String::new(),
            field,
            error: None,
        }
    }

    pub fn active_buffer(&mut self) -> &mut String {
        match self.field {
            FormField::Name => &mut self.name,
            FormField::Value => &mut self.value,
            FormField::ContentType => &mut self.content_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modal {
    AddSecret(SecretForm),
    AddVersion { secret: String, form: SecretForm },
    Notice { title: String, body: String, is_error: bool },
    About,
}

impl Modal {
    pub fn error(body: impl Into<String>) -> Self {
        Modal::Notice { title: "Error".into(), body: body.into(), is_error: true }
    }

    pub fn success(body: impl Into<String>) -> Self {
        Modal::Notice { title: "Success".into(), body: body.into(), is_error: false }
    }
}

/// Completions of gateway tasks, delivered back to the UI loop.
///
/// Each load carries the generation of the level it was issued for so that
/// results belonging to a superseded selection can be dropped.
#[derive(Debug)]
pub enum AppEvent {
    VaultsLoaded {
        generation: u64,
        result: Result<Vec<Vault>, GatewayError>,
    },
    SecretsLoaded {
        generation: u64,
        vault: String,
        result: Result<Vec<Secret>, GatewayError>,
    },
    VersionsLoaded {
        generation: u64,
        secret: String,
        result: Result<Vec<SecretVersion>, GatewayError>,
    },
    ValueLoaded {
        generation: u64,
        secret: String,
        version: String,
        result: Result<Option<String>, GatewayError>,
    },
    SecretWritten {
        kind: WriteKind,
        vault: String,
        secret: String,
        result: Result<(), GatewayError>,
    },
}

/// First eight characters of a version id, never splitting a char.
pub fn short_version(version: &str) -> &str {
    match version.char_indices().nth(8) {
        Some((idx, _)) => &version[..idx],
        None => version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(name: &str, rg: &str) -> Vault {
        Vault {
            name: name.into(),
            subscription: String::new(),
            resource_group: rg.into(),
            id: String::new(),
        }
    }

    #[test]
    fn vault_matches_name_or_resource_group() {
        let v = vault("Prod-KV", "Payments-RG");
        assert!(v.matches("prod"));
        assert!(v.matches("payments"));
        assert!(!v.matches("staging"));
    }

    #[test]
    fn short_version_truncates_and_tolerates_short_ids() {
        assert_eq!(short_version("abcdef1234567890"), "abcdef12");
        assert_eq!(short_version("abc"), "abc");
        assert_eq!(short_version(""), "");
        assert_eq!(short_version("ééééééééé"), "éééééééé");
    }

    #[test]
    fn pane_cycle_round_trips() {
        let mut pane = Pane::Vaults;
        for _ in 0..4 {
            pane = pane.next();
        }
        assert_eq!(pane, Pane::Vaults);
        assert_eq!(Pane::Vaults.prev(), Pane::Value);
        assert_eq!(Pane::Versions.filter_target(), None);
    }
}
