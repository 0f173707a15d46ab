use std::future::Future;
use std::sync::Arc;

use ratatui::widgets::ListState;
use throbber_widgets_tui::ThrobberState;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::azure::KeyVaultGateway;
use crate::error::GatewayError;
use crate::model::{
    AppEvent, FilterTarget, Filterable, FormField, LoadState, Modal, Pane, Secret, SecretForm,
    SecretVersion, Vault, ValueState, WriteKind, short_version,
};

/// Stable, case-insensitive substring filter. Blank text keeps everything.
pub fn filter_items<T: Filterable + Clone>(items: &[T], filter: &str) -> Vec<T> {
    let needle = filter.trim().to_lowercase();
    if needle.is_empty() {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|item| item.matches(&needle))
        .cloned()
        .collect()
}

/// One level of the vault → secret → version hierarchy.
///
/// `generation` is bumped whenever a load starts or the level is cleared;
/// completions for any other generation are stale and must be ignored.
pub struct Level<T> {
    state: LoadState<T>,
    filter: String,
    filtered: Vec<T>,
    generation: u64,
    pub list_state: ListState,
}

impl<T> Default for Level<T> {
    fn default() -> Self {
        Self {
            state: LoadState::Idle,
            filter: String::new(),
            filtered: Vec::new(),
            generation: 0,
            list_state: ListState::default(),
        }
    }
}

impl<T: Filterable + Clone> Level<T> {
    pub fn state(&self) -> &LoadState<T> {
        &self.state
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn filtered(&self) -> &[T] {
        &self.filtered
    }

    /// Size of the unfiltered set.
    pub fn total(&self) -> usize {
        match &self.state {
            LoadState::Loaded(items) => items.len(),
            _ => 0,
        }
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, LoadState::Loading)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, LoadState::Loaded(_))
    }

    pub fn highlighted(&self) -> Option<&T> {
        self.list_state
            .selected()
            .and_then(|idx| self.filtered.get(idx))
    }

    pub fn highlight_next(&mut self) {
        if self.filtered.is_empty() {
            return;
        }
        let next = match self.list_state.selected() {
            Some(idx) => (idx + 1).min(self.filtered.len() - 1),
            None => 0,
        };
        self.list_state.select(Some(next));
    }

    pub fn highlight_prev(&mut self) {
        if self.filtered.is_empty() {
            return;
        }
        let prev = self.list_state.selected().unwrap_or(0).saturating_sub(1);
        self.list_state.select(Some(prev));
    }

    fn begin_load(&mut self) -> u64 {
        self.generation += 1;
        self.state = LoadState::Loading;
        self.filtered.clear();
        self.list_state.select(None);
        self.generation
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.state = LoadState::Idle;
        self.filtered.clear();
        self.list_state.select(None);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn finish(&mut self, result: Result<Vec<T>, GatewayError>) {
        self.state = match result {
            Ok(items) if items.is_empty() => LoadState::Empty,
            Ok(items) => LoadState::Loaded(items),
            Err(e) => LoadState::Failed(e.to_string()),
        };
        self.reapply();
    }

    fn set_filter(&mut self, text: &str) {
        self.filter = text.to_string();
        if self.is_loaded() {
            self.reapply();
        }
    }

    fn reapply(&mut self) {
        self.filtered = match &self.state {
            LoadState::Loaded(items) => filter_items(items, &self.filter),
            _ => Vec::new(),
        };
        let first = if self.filtered.is_empty() { None } else { Some(0) };
        self.list_state.select(first);
    }
}

/// Navigation state machine: the selection hierarchy plus the per-level
/// result sets, driven from the UI thread.
///
/// Gateway calls run as spawned tasks that report back through `tx`; the
/// event loop hands each completion to [`App::handle_event`].
pub struct App {
    gateway: Arc<dyn KeyVaultGateway>,
    tx: UnboundedSender<AppEvent>,
    pub vaults: Level<Vault>,
    pub secrets: Level<Secret>,
    pub versions: Level<SecretVersion>,
    pub value: ValueState,
    value_generation: u64,
    pub selected_vault: Option<Vault>,
    pub selected_secret: Option<Secret>,
    pub status: String,
    pub modal: Option<Modal>,
    pub focus: Pane,
    pub editing_filter: bool,
    pending_writes: usize,
    pub throbber_state: ThrobberState,
}

impl App {
    pub fn new(
        gateway: Arc<dyn KeyVaultGateway>,
        tx: UnboundedSender<AppEvent>,
        initial_filter: Option<String>,
    ) -> Self {
        let mut vaults = Level::default();
        if let Some(filter) = initial_filter {
            vaults.set_filter(&filter);
        }
        Self {
            gateway,
            tx,
            vaults,
            secrets: Level::default(),
            versions: Level::default(),
            value: ValueState::Idle,
            value_generation: 0,
            selected_vault: None,
            selected_secret: None,
            status: "Loading Key Vaults...".into(),
            modal: None,
            focus: Pane::Vaults,
            editing_filter: false,
            pending_writes: 0,
            throbber_state: ThrobberState::default(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.vaults.is_loading()
            || self.secrets.is_loading()
            || self.versions.is_loading()
            || self.value == ValueState::Loading
            || self.pending_writes > 0
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = AppEvent> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
    }

    fn clear_value(&mut self) {
        self.value_generation += 1;
        self.value = ValueState::Idle;
    }

    /// Reloads the vault list, dropping every selection beneath it.
    pub fn refresh_vaults(&mut self) {
        info!("refreshing key vaults");
        self.selected_vault = None;
        self.selected_secret = None;
        self.secrets.clear();
        self.versions.clear();
        self.clear_value();

        let generation = self.vaults.begin_load();
        self.status = "Loading Key Vaults...".into();
        let gateway = Arc::clone(&self.gateway);
        self.spawn(async move {
            let result = gateway.list_vaults().await;
            AppEvent::VaultsLoaded { generation, result }
        });
    }

    pub fn select_vault(&mut self, vault: Vault) {
        info!(vault = %vault.name, "vault opened");
        self.selected_vault = Some(vault);
        self.selected_secret = None;
        self.secrets.clear();
        self.secrets.set_filter("");
        self.versions.clear();
        self.clear_value();
        self.refresh_secrets();
    }

    pub fn refresh_secrets(&mut self) {
        let Some(vault) = self.selected_vault.as_ref().map(|v| v.name.clone()) else {
            debug!("refresh_secrets without a selected vault");
            return;
        };
        let generation = self.secrets.begin_load();
        self.status = format!("Loading secrets from {vault}...");
        let gateway = Arc::clone(&self.gateway);
        self.spawn(async move {
            let result = gateway.list_secrets(&vault).await;
            AppEvent::SecretsLoaded {
                generation,
                vault,
                result,
            }
        });
    }

    pub fn select_secret(&mut self, secret: Secret) {
        if self.selected_vault.is_none() {
            debug!("select_secret without a selected vault");
            return;
        }
        info!(secret = %secret.name, "secret opened");
        self.selected_secret = Some(secret);
        self.versions.clear();
        self.clear_value();
        self.refresh_versions();
    }

    pub fn refresh_versions(&mut self) {
        let (Some(vault), Some(secret)) = (
            self.selected_vault.as_ref().map(|v| v.name.clone()),
            self.selected_secret.as_ref().map(|s| s.name.clone()),
        ) else {
            debug!("refresh_versions without a selected vault and secret");
            return;
        };
        let generation = self.versions.begin_load();
        self.status = format!("Loading versions for {secret}...");
        let gateway = Arc::clone(&self.gateway);
        self.spawn(async move {
            let result = gateway.list_versions(&vault, &secret).await;
            AppEvent::VersionsLoaded {
                generation,
                secret,
                result,
            }
        });
    }

    pub fn select_version(&mut self, version: SecretVersion) {
        let (Some(vault), Some(secret)) = (
            self.selected_vault.as_ref().map(|v| v.name.clone()),
            self.selected_secret.as_ref().map(|s| s.name.clone()),
        ) else {
            debug!("select_version without a selected vault and secret");
            return;
        };
        self.value_generation += 1;
        let generation = self.value_generation;
        self.value = ValueState::Loading;
        self.status = "Loading secret value...".into();
        let gateway = Arc::clone(&self.gateway);
        let version = version.version;
        self.spawn(async move {
            let result = gateway.get_value(&vault, &secret, Some(&version)).await;
            AppEvent::ValueLoaded {
                generation,
                secret,
                version,
                result,
            }
        });
    }

    /// Recomputes the displayed subset for one level. Never fetches.
    pub fn set_filter(&mut self, target: FilterTarget, text: &str) {
        match target {
            FilterTarget::Vaults => {
                self.vaults.set_filter(text);
                if self.vaults.is_loaded() {
                    self.status = self.vault_filter_status();
                }
            }
            FilterTarget::Secrets => {
                self.secrets.set_filter(text);
                if self.secrets.is_loaded() {
                    if let Some(vault) = &self.selected_vault {
                        self.status = self.secret_filter_status(&vault.name);
                    }
                }
            }
        }
    }

    pub fn filter_text(&self, target: FilterTarget) -> &str {
        match target {
            FilterTarget::Vaults => self.vaults.filter(),
            FilterTarget::Secrets => self.secrets.filter(),
        }
    }

    fn vault_filter_status(&self) -> String {
        let shown = self.vaults.filtered().len();
        let total = self.vaults.total();
        if shown > 0 {
            format!("Showing {shown} of {total} Key Vault(s)")
        } else {
            format!("No matches found (total: {total})")
        }
    }

    fn secret_filter_status(&self, vault: &str) -> String {
        let shown = self.secrets.filtered().len();
        let total = self.secrets.total();
        if shown > 0 {
            format!("Showing {shown} of {total} secret(s) from {vault}")
        } else {
            format!("No matches found (total: {total})")
        }
    }

    /// Applies one task completion, dropping it if its level has moved on.
    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::VaultsLoaded { generation, result } => {
                if !self.vaults.is_current(generation) {
                    debug!(generation, "discarding stale vault list");
                    return;
                }
                self.vaults.finish(result);
                self.status = status_for(
                    self.vaults.state(),
                    self.vault_filter_status(),
                    "No Key Vaults found".into(),
                );
            }
            AppEvent::SecretsLoaded {
                generation,
                vault,
                result,
            } => {
                if !self.secrets.is_current(generation) {
                    debug!(generation, vault = %vault, "discarding stale secret list");
                    return;
                }
                self.secrets.finish(result);
                let loaded = if self.secrets.filter().trim().is_empty() {
                    format!("Loaded {} secret(s) from {vault}", self.secrets.total())
                } else {
                    self.secret_filter_status(&vault)
                };
                self.status =
                    status_for(self.secrets.state(), loaded, format!("No secrets in {vault}"));
            }
            AppEvent::VersionsLoaded {
                generation,
                secret,
                result,
            } => {
                if !self.versions.is_current(generation) {
                    debug!(generation, secret = %secret, "discarding stale version list");
                    return;
                }
                self.versions.finish(result);
                let loaded = format!("Loaded {} version(s) for {secret}", self.versions.total());
                self.status = status_for(
                    self.versions.state(),
                    loaded,
                    format!("No versions for {secret}"),
                );
            }
            AppEvent::ValueLoaded {
                generation,
                secret,
                version,
                result,
            } => {
                if generation != self.value_generation {
                    debug!(generation, secret = %secret, "discarding stale secret value");
                    return;
                }
                match result {
                    Ok(value) => {
                        self.value = ValueState::Loaded(value.unwrap_or_default());
                        self.status = format!(
                            "Loaded value for {secret} (version {}...)",
                            short_version(&version)
                        );
                    }
                    Err(e) => {
                        self.status = format!("Error: {e}");
                        self.value = ValueState::Failed(e.to_string());
                    }
                }
            }
            AppEvent::SecretWritten {
                kind,
                vault,
                secret,
                result,
            } => {
                self.pending_writes = self.pending_writes.saturating_sub(1);
                self.finish_write(kind, &vault, &secret, result);
            }
        }
    }

    fn finish_write(
        &mut self,
        kind: WriteKind,
        vault: &str,
        secret: &str,
        result: Result<(), GatewayError>,
    ) {
        let vault_still_open = self
            .selected_vault
            .as_ref()
            .is_some_and(|v| v.name == vault);
        let secret_still_open = vault_still_open
            && self
                .selected_secret
                .as_ref()
                .is_some_and(|s| s.name == secret);

        match (kind, result) {
            (WriteKind::NewSecret, Ok(())) => {
                info!(secret, "secret created");
                if vault_still_open {
                    self.refresh_secrets();
                }
                self.status = format!("Secret '{secret}' created successfully");
                self.show_notice(Modal::success(format!(
                    "Secret '{secret}' has been created successfully!"
                )));
            }
            (WriteKind::NewVersion, Ok(())) => {
                info!(secret, "secret version created");
                if secret_still_open {
                    self.refresh_versions();
                }
                self.status = format!("New version created for '{secret}'");
                self.show_notice(Modal::success(format!(
                    "New version of '{secret}' has been created successfully!"
                )));
            }
            (WriteKind::NewSecret, Err(e)) => {
                self.status = format!("Failed to create secret '{secret}'");
                self.show_notice(Modal::error(format!(
                    "Failed to create secret '{secret}': {e}"
                )));
            }
            (WriteKind::NewVersion, Err(e)) => {
                self.status = format!("Failed to create new version for '{secret}'");
                self.show_notice(Modal::error(format!(
                    "Failed to create new version for '{secret}': {e}"
                )));
            }
        }
    }

    /// Write results never replace a dialog the user is typing into; the
    /// status line still reports them.
    fn show_notice(&mut self, notice: Modal) {
        if matches!(
            self.modal,
            Some(Modal::AddSecret(_) | Modal::AddVersion { .. })
        ) {
            debug!("dialog open, write result reported in status only");
            return;
        }
        self.modal = Some(notice);
    }

    /// Creates a secret in the open vault; reloads the secret list on success.
    pub fn add_secret(&mut self, name: &str, value: &str, content_type: Option<&str>) {
        let Some(vault) = self.selected_vault.as_ref().map(|v| v.name.clone()) else {
            self.modal = Some(Modal::error("Please select a Key Vault first"));
            return;
        };
        if let Some(problem) = missing_field(Some(name), value) {
            self.modal = Some(Modal::error(problem));
            return;
        }
        let name = name.trim().to_string();
        self.status = format!("Creating secret '{name}'...");
        self.write(WriteKind::NewSecret, vault, name, value, content_type);
    }

    /// Appends a version to the open secret; reloads its versions on success.
    pub fn add_version(&mut self, value: &str, content_type: Option<&str>) {
        let Some(vault) = self.selected_vault.as_ref().map(|v| v.name.clone()) else {
            self.modal = Some(Modal::error("Please select a Key Vault first"));
            return;
        };
        let Some(secret) = self.selected_secret.as_ref().map(|s| s.name.clone()) else {
            self.modal = Some(Modal::error("Please select a secret first"));
            return;
        };
        if let Some(problem) = missing_field(None, value) {
            self.modal = Some(Modal::error(problem));
            return;
        }
        self.status = format!("Creating new version for '{secret}'...");
        self.write(WriteKind::NewVersion, vault, secret, value, content_type);
    }

    fn write(
        &mut self,
        kind: WriteKind,
        vault: String,
        secret: String,
        value: &str,
        content_type: Option<&str>,
    ) {
        self.pending_writes += 1;
        let value = value.trim().to_string();
        let content_type = content_type
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let gateway = Arc::clone(&self.gateway);
        self.spawn(async move {
            let result = gateway
                .set_secret(&vault, &secret, &value, content_type.as_deref())
                .await;
            AppEvent::SecretWritten {
                kind,
                vault,
                secret,
                result,
            }
        });
    }

    pub fn open_add_secret(&mut self) {
        if self.selected_vault.is_none() {
            self.modal = Some(Modal::error("Please select a Key Vault first"));
            return;
        }
        self.modal = Some(Modal::AddSecret(SecretForm::new(FormField::Name)));
    }

    pub fn open_add_version(&mut self) {
        if self.selected_vault.is_none() {
            self.modal = Some(Modal::error("Please select a Key Vault first"));
            return;
        }
        let Some(secret) = self.selected_secret.as_ref().map(|s| s.name.clone()) else {
            self.modal = Some(Modal::error("Please select a secret first"));
            return;
        };
        self.modal = Some(Modal::AddVersion {
            secret,
            form: SecretForm::new(FormField::Value),
        });
    }

    pub fn open_about(&mut self) {
        self.modal = Some(Modal::About);
    }

    /// Confirms the open modal. Dialogs with missing fields stay open with
    /// an inline error; notices are dismissed.
    pub fn submit_modal(&mut self) {
        match self.modal.take() {
            Some(Modal::AddSecret(mut form)) => {
                if let Some(problem) = missing_field(Some(&form.name), &form.value) {
                    form.error = Some(problem.into());
                    self.modal = Some(Modal::AddSecret(form));
                    return;
                }
                self.add_secret(&form.name, &form.value, Some(&form.content_type));
            }
            Some(Modal::AddVersion { secret, mut form }) => {
                if let Some(problem) = missing_field(None, &form.value) {
                    form.error = Some(problem.into());
                    self.modal = Some(Modal::AddVersion { secret, form });
                    return;
                }
                self.add_version(&form.value, Some(&form.content_type));
            }
            Some(Modal::Notice { .. }) | Some(Modal::About) | None => {}
        }
    }

    pub fn close_modal(&mut self) {
        self.modal = None;
    }

    pub fn move_highlight(&mut self, down: bool) {
        match (self.focus, down) {
            (Pane::Vaults, true) => self.vaults.highlight_next(),
            (Pane::Vaults, false) => self.vaults.highlight_prev(),
            (Pane::Secrets, true) => self.secrets.highlight_next(),
            (Pane::Secrets, false) => self.secrets.highlight_prev(),
            (Pane::Versions, true) => self.versions.highlight_next(),
            (Pane::Versions, false) => self.versions.highlight_prev(),
            (Pane::Value, _) => {}
        }
    }

    /// Opens the highlighted item of the focused list ("chosen", not merely
    /// highlighted) and moves focus one level down.
    pub fn open_highlighted(&mut self) {
        match self.focus {
            Pane::Vaults => {
                if let Some(vault) = self.vaults.highlighted().cloned() {
                    self.select_vault(vault);
                    self.focus = Pane::Secrets;
                }
            }
            Pane::Secrets => {
                if let Some(secret) = self.secrets.highlighted().cloned() {
                    self.select_secret(secret);
                    self.focus = Pane::Versions;
                }
            }
            Pane::Versions => {
                if let Some(version) = self.versions.highlighted().cloned() {
                    self.select_version(version);
                }
            }
            Pane::Value => {}
        }
    }

    /// The displayed value, if there is one worth copying.
    pub fn copyable_value(&self) -> Option<&str> {
        match &self.value {
            ValueState::Loaded(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }
}

fn status_for<T>(state: &LoadState<T>, loaded: String, empty: String) -> String {
    match state {
        LoadState::Failed(message) => format!("Error: {message}"),
        LoadState::Empty => empty,
        _ => loaded,
    }
}

fn missing_field(name: Option<&str>, value: &str) -> Option<&'static str> {
    if name.is_some_and(|n| n.trim().is_empty()) {
        return Some("Secret name is required");
    }
    if value.trim().is_empty() {
        return Some("Secret value is required");
    }
    None
}
