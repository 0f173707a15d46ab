use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::app::App;
use crate::model::{FormField, Modal, SecretForm};

/// What the event loop has to do after a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    Copy(String),
}

/// Maps one key press onto the navigation state machine.
pub fn handle_key(app: &mut App, key: KeyEvent) -> Action {
    if key.kind == KeyEventKind::Release {
        return Action::None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    if ctrl && key.code == KeyCode::Char('q') {
        return Action::Quit;
    }
    if app.modal.is_some() {
        handle_modal_key(app, key);
        return Action::None;
    }
    if app.editing_filter {
        handle_filter_key(app, key);
        return Action::None;
    }
    if (ctrl || alt) && key.code == KeyCode::Char('c') {
        return copy_value(app);
    }

    match key.code {
        KeyCode::Char('q') => return Action::Quit,
        KeyCode::Tab => app.focus = app.focus.next(),
        KeyCode::BackTab => app.focus = app.focus.prev(),
        KeyCode::Down | KeyCode::Char('j') => app.move_highlight(true),
        KeyCode::Up | KeyCode::Char('k') => app.move_highlight(false),
        KeyCode::Enter => app.open_highlighted(),
        KeyCode::Char('/') => {
            if app.focus.filter_target().is_some() {
                app.editing_filter = true;
            }
        }
        KeyCode::Char('r') | KeyCode::F(5) => app.refresh_vaults(),
        KeyCode::Char('s') => app.open_add_secret(),
        KeyCode::Char('v') => app.open_add_version(),
        KeyCode::Char('c') => return copy_value(app),
        KeyCode::Char('?') | KeyCode::F(1) => app.open_about(),
        _ => {}
    }
    Action::None
}

/// Bracketed paste goes to whichever text field has the keyboard.
pub fn handle_paste(app: &mut App, text: &str) {
    if let Some((form, _)) = form_mut(&mut app.modal) {
        form.active_buffer().push_str(text);
        form.error = None;
        return;
    }
    if app.editing_filter {
        if let Some(target) = app.focus.filter_target() {
            let filter = format!("{}{}", app.filter_text(target), text.trim_end_matches('\n'));
            app.set_filter(target, &filter);
        }
    }
}

fn copy_value(app: &mut App) -> Action {
    match app.copyable_value() {
        Some(value) => Action::Copy(value.to_string()),
        None => {
            app.status = "No secret value to copy".into();
            Action::None
        }
    }
}

fn handle_filter_key(app: &mut App, key: KeyEvent) {
    let Some(target) = app.focus.filter_target() else {
        app.editing_filter = false;
        return;
    };
    let mut text = app.filter_text(target).to_string();
    match key.code {
        KeyCode::Esc => {
            app.editing_filter = false;
            app.set_filter(target, "");
        }
        KeyCode::Enter => app.editing_filter = false,
        KeyCode::Tab => {
            app.editing_filter = false;
            app.focus = app.focus.next();
        }
        KeyCode::Backspace => {
            text.pop();
            app.set_filter(target, &text);
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            text.push(c);
            app.set_filter(target, &text);
        }
        _ => {}
    }
}

fn handle_modal_key(app: &mut App, key: KeyEvent) {
    if form_mut(&mut app.modal).is_none() {
        if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
            app.close_modal();
        }
        return;
    }
    match key.code {
        KeyCode::Esc => app.close_modal(),
        KeyCode::Enter => app.submit_modal(),
        _ => {
            if let Some((form, has_name)) = form_mut(&mut app.modal) {
                edit_form(form, key, has_name);
            }
        }
    }
}

fn form_mut(modal: &mut Option<Modal>) -> Option<(&mut SecretForm, bool)> {
    match modal {
        Some(Modal::AddSecret(form)) => Some((form, true)),
        Some(Modal::AddVersion { form, .. }) => Some((form, false)),
        _ => None,
    }
}

fn edit_form(form: &mut SecretForm, key: KeyEvent, has_name: bool) {
    match key.code {
        KeyCode::Tab => form.field = next_field(form.field, has_name),
        KeyCode::BackTab => form.field = prev_field(form.field, has_name),
        KeyCode::Backspace => {
            form.active_buffer().pop();
        }
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            form.active_buffer().push(c);
            form.error = None;
        }
        _ => {}
    }
}

fn next_field(field: FormField, has_name: bool) -> FormField {
    match field {
        FormField::Name => FormField::Value,
        FormField::Value => FormField::ContentType,
        FormField::ContentType if has_name => FormField::Name,
        FormField::ContentType => FormField::Value,
    }
}

fn prev_field(field: FormField, has_name: bool) -> FormField {
    match field {
        FormField::Value if has_name => FormField::Name,
        FormField::Value => FormField::ContentType,
        FormField::ContentType => FormField::Value,
        FormField::Name => FormField::ContentType,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::FutureExt;
    use futures::future::BoxFuture;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::azure::KeyVaultGateway;
    use crate::error::Result;
    use crate::model::{AppEvent, Pane, Secret, SecretVersion, Vault, ValueState};
    use crate::ui::vault_lines;

    struct StaticGateway;

    impl KeyVaultGateway for StaticGateway {
        fn list_vaults(&self) -> BoxFuture<'_, Result<Vec<Vault>>> {
            let vaults: Vec<Vault> = ["kv-prod", "kv-dev"]
                .into_iter()
                .map(|name| Vault {
                    name: name.into(),
                    subscription: String::new(),
                    resource_group: "rg".into(),
                    id: String::new(),
                })
                .collect();
            async move { Ok(vaults) }.boxed()
        }

        fn list_secrets<'a>(&'a self, _vault: &'a str) -> BoxFuture<'a, Result<Vec<Secret>>> {
            async move { Ok(Vec::new()) }.boxed()
        }

        fn list_versions<'a>(
            &'a self,
            _vault: &'a str,
            _secret: &'a str,
        ) -> BoxFuture<'a, Result<Vec<SecretVersion>>> {
            async move { Ok(Vec::new()) }.boxed()
        }

        fn get_value<'a>(
            &'a self,
            _vault: &'a str,
            _secret: &'a str,
            _version: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Option<String>>> {
            async move { Ok(None) }.boxed()
        }

        fn set_secret<'a>(
            &'a self,
            _vault: &'a str,
            _secret: &'a str,
            _value: &'a str,
            _content_type: Option<&'a str>,
        ) -> BoxFuture<'a, Result<()>> {
            async move { Ok(()) }.boxed()
        }
    }

    async fn loaded_app() -> (App, UnboundedReceiver<AppEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut app = App::new(Arc::new(StaticGateway), tx, None);
        app.refresh_vaults();
        let event = rx.recv().await.expect("vaults");
        app.handle_event(event);
        (app, rx)
    }

    fn press(app: &mut App, code: KeyCode) -> Action {
        handle_key(app, KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            press(app, KeyCode::Char(c));
        }
    }

    #[tokio::test]
    async fn slash_edits_the_focused_filter_live() {
        let (mut app, _rx) = loaded_app().await;
        press(&mut app, KeyCode::Char('/'));
        assert!(app.editing_filter);

        type_text(&mut app, "dev");
        assert_eq!(app.vaults.filter(), "dev");
        assert_eq!(vault_lines(&app.vaults), ["kv-dev (rg)"]);

        // 'q' is text while editing
        assert_eq!(press(&mut app, KeyCode::Char('q')), Action::None);
        press(&mut app, KeyCode::Backspace);
        assert_eq!(app.vaults.filter(), "dev");

        press(&mut app, KeyCode::Esc);
        assert!(!app.editing_filter);
        assert_eq!(app.vaults.filtered().len(), 2);
    }

    #[tokio::test]
    async fn quit_keys() {
        let (mut app, _rx) = loaded_app().await;
        assert_eq!(press(&mut app, KeyCode::Char('q')), Action::Quit);

        app.open_about();
        let ctrl_q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::CONTROL);
        assert_eq!(handle_key(&mut app, ctrl_q), Action::Quit);
    }

    #[tokio::test]
    async fn enter_opens_vault_and_moves_focus() {
        let (mut app, _rx) = loaded_app().await;
        press(&mut app, KeyCode::Down);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.focus, Pane::Secrets);
        assert_eq!(
            app.selected_vault.as_ref().map(|v| v.name.as_str()),
            Some("kv-dev")
        );
    }

    #[tokio::test]
    async fn add_secret_dialog_collects_fields() {
        let (mut app, mut rx) = loaded_app().await;
        press(&mut app, KeyCode::Enter);
        let event = rx.recv().await.expect("secrets");
        app.handle_event(event);

        press(&mut app, KeyCode::Char('s'));
        type_text(&mut app, "api-key");
        press(&mut app, KeyCode::Tab);
        handle_paste(&mut app, "s3cr3t");
        press(&mut app, KeyCode::Tab);
        type_text(&mut app, "text/plain");

        match &app.modal {
            Some(Modal::AddSecret(form)) => {
                assert_eq!(form.name, "api-key");
                assert_eq!(form.value, "s3cr3t");
                assert_eq!(form.content_type, "text/plain");
            }
            other => panic!("unexpected modal {other:?}"),
        }

        press(&mut app, KeyCode::Enter);
        assert!(app.modal.is_none());
        assert!(app.is_busy());
    }

    #[tokio::test]
    async fn paste_clears_a_validation_error() {
        let (mut app, mut rx) = loaded_app().await;
        press(&mut app, KeyCode::Enter);
        let event = rx.recv().await.expect("secrets");
        app.handle_event(event);

        press(&mut app, KeyCode::Char('s'));
        press(&mut app, KeyCode::Enter);
        handle_paste(&mut app, "api-key");

        match &app.modal {
            Some(Modal::AddSecret(form)) => {
                assert_eq!(form.name, "api-key");
                assert_eq!(form.error, None);
            }
            other => panic!("unexpected modal {other:?}"),
        }
    }

    #[tokio::test]
    async fn notices_close_on_enter() {
        let (mut app, _rx) = loaded_app().await;
        press(&mut app, KeyCode::Char('v'));
        assert!(matches!(app.modal, Some(Modal::Notice { is_error: true, .. })));
        press(&mut app, KeyCode::Enter);
        assert!(app.modal.is_none());
    }

    #[tokio::test]
    async fn copy_only_when_a_value_is_shown() {
        let (mut app, _rx) = loaded_app().await;
        assert_eq!(press(&mut app, KeyCode::Char('c')), Action::None);
        assert_eq!(app.status, "No secret value to copy");

        app.value = ValueState::Loaded("hunter2".into());
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(handle_key(&mut app, ctrl_c), Action::Copy("hunter2".into()));
        let alt_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::ALT);
        assert_eq!(handle_key(&mut app, alt_c), Action::Copy("hunter2".into()));
    }

    #[test]
    fn version_form_skips_the_name_field() {
        assert_eq!(next_field(FormField::ContentType, false), FormField::Value);
        assert_eq!(prev_field(FormField::Value, false), FormField::ContentType);
        assert_eq!(next_field(FormField::ContentType, true), FormField::Name);
        assert_eq!(prev_field(FormField::Name, true), FormField::ContentType);
    }
}
