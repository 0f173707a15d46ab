use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::Span,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use throbber_widgets_tui::{BRAILLE_SIX, Throbber, WhichUse};
use time::UtcOffset;
use time::macros::format_description;

use crate::app::{App, Level};
use crate::model::{
    Filterable, FormField, LoadState, Modal, Pane, Secret, SecretForm, SecretVersion, Vault,
    ValueState, short_version,
};

const ABOUT_ART: &str = r#"
     e      888  /   Y88b      /
    d8b     888 /     Y88b    /
   /Y88b    888/\      Y88b  /
  /  Y88b   888  \      Y888/
 /____Y88b  888   \      Y8/
/      Y88b 888    \      Y
"#;

const ABOUT_TEXT: &str = "Azure Key Vault Manager (TUI)
Browse and edit Key Vault secrets through the Azure CLI

Tab / Shift+Tab   move between panes
Up/Down, j/k      navigate within lists
Enter             open item
/                 filter vaults or secrets
s / v             new secret / new version
c, Ctrl+C, Alt+C  copy secret value
r, F5             refresh all
?, F1             this screen
q, Ctrl+Q         quit";

fn mark(enabled: bool) -> &'static str {
    if enabled { "✓" } else { "✗" }
}

pub fn vault_label(vault: &Vault) -> String {
    format!("{} ({})", vault.name, vault.resource_group)
}

pub fn secret_label(secret: &Secret) -> String {
    match secret.content_type.as_deref().map(str::trim) {
        Some(content_type) if !content_type.is_empty() => {
            format!("{} [{}] {}", secret.name, content_type, mark(secret.enabled))
        }
        _ => format!("{} {}", secret.name, mark(secret.enabled)),
    }
}

pub fn version_label(version: &SecretVersion) -> String {
    let updated = version
        .updated
        .and_then(|t| {
            t.to_offset(UtcOffset::UTC)
                .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
                .ok()
        })
        .unwrap_or_else(|| "N/A".into());
    format!(
        "{} {}... ({})",
        mark(version.enabled),
        short_version(&version.version),
        updated
    )
}

/// Display lines for a level: item labels, or a single placeholder line.
fn level_lines<T: Filterable + Clone>(
    level: &Level<T>,
    label: fn(&T) -> String,
    empty: &str,
) -> Vec<String> {
    match level.state() {
        LoadState::Idle => Vec::new(),
        LoadState::Loading => vec!["Loading...".into()],
        LoadState::Empty => vec![empty.into()],
        LoadState::Failed(message) => vec![format!("Error: {message}")],
        LoadState::Loaded(_) if level.filtered().is_empty() => {
            vec![format!("No matches found (total: {})", level.total())]
        }
        LoadState::Loaded(_) => level.filtered().iter().map(label).collect(),
    }
}

pub fn vault_lines(level: &Level<Vault>) -> Vec<String> {
    level_lines(level, vault_label, "No Key Vaults found")
}

pub fn secret_lines(level: &Level<Secret>) -> Vec<String> {
    level_lines(level, secret_label, "No secrets found")
}

pub fn version_lines(level: &Level<SecretVersion>) -> Vec<String> {
    level_lines(level, version_label, "No versions found")
}

pub fn value_text(value: &ValueState) -> String {
    match value {
        ValueState::Idle => String::new(),
        ValueState::Loading => "Loading...".into(),
        ValueState::Loaded(v) if v.is_empty() => "(empty)".into(),
        ValueState::Loaded(v) => v.clone(),
        ValueState::Failed(message) => format!("Error: {message}"),
    }
}

pub fn draw_ui(f: &mut Frame<'_>, app: &mut App) {
    let area = f.area();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(area);

    let header = Paragraph::new(
        " Azure Key Vault Manager | [Tab] pane [/] filter [Enter] open [s] new secret [v] new version [c] copy [r] refresh [?] about [q] quit",
    )
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(header, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(40),
            Constraint::Percentage(30),
        ])
        .split(rows[1]);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(40), Constraint::Min(3)])
        .split(columns[2]);

    let editing_vaults = app.editing_filter && app.focus == Pane::Vaults;
    let lines = vault_lines(&app.vaults);
    let filter = app.vaults.filter().to_string();
    draw_list_pane(
        f,
        columns[0],
        "Key Vaults".into(),
        app.focus == Pane::Vaults,
        Some((filter.as_str(), editing_vaults)),
        lines,
        !app.vaults.filtered().is_empty(),
        &mut app.vaults.list_state,
    );

    let secrets_title = match &app.selected_vault {
        Some(vault) => format!("Secrets ({})", vault.name),
        None => "Secrets".into(),
    };
    let editing_secrets = app.editing_filter && app.focus == Pane::Secrets;
    let lines = secret_lines(&app.secrets);
    let filter = app.secrets.filter().to_string();
    draw_list_pane(
        f,
        columns[1],
        secrets_title,
        app.focus == Pane::Secrets,
        Some((filter.as_str(), editing_secrets)),
        lines,
        !app.secrets.filtered().is_empty(),
        &mut app.secrets.list_state,
    );

    let versions_title = match &app.selected_secret {
        Some(secret) => format!("Secret Details ({})", secret.name),
        None => "Secret Details".into(),
    };
    let lines = version_lines(&app.versions);
    draw_list_pane(
        f,
        right[0],
        versions_title,
        app.focus == Pane::Versions,
        None,
        lines,
        !app.versions.filtered().is_empty(),
        &mut app.versions.list_state,
    );

    let value = Paragraph::new(value_text(&app.value))
        .wrap(Wrap { trim: false })
        .block(pane_block("Secret Value".into(), app.focus == Pane::Value));
    f.render_widget(value, right[1]);

    draw_status(f, rows[2], app);

    if let Some(modal) = &app.modal {
        draw_modal(f, modal);
    }
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    let border = if focused {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    Block::default()
        .borders(Borders::ALL)
        .border_style(border)
        .title(Span::styled(title, border))
}

#[allow(clippy::too_many_arguments)]
fn draw_list_pane(
    f: &mut Frame<'_>,
    area: Rect,
    title: String,
    focused: bool,
    filter: Option<(&str, bool)>,
    lines: Vec<String>,
    has_items: bool,
    list_state: &mut ListState,
) {
    let block = pane_block(title, focused);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let list_area = match filter {
        Some((text, editing)) => {
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(1), Constraint::Min(1)])
                .split(inner);
            let cursor = if editing { "_" } else { "" };
            let style = if editing {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::Gray)
            };
            f.render_widget(
                Paragraph::new(format!("Filter: {text}{cursor}")).style(style),
                parts[0],
            );
            parts[1]
        }
        None => inner,
    };

    let items: Vec<ListItem> = lines.into_iter().map(ListItem::new).collect();
    let list = List::new(items)
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");
    if has_items {
        f.render_stateful_widget(list, list_area, list_state);
    } else {
        // placeholders are never highlighted
        f.render_stateful_widget(list, list_area, &mut ListState::default());
    }
}

fn draw_status(f: &mut Frame<'_>, area: Rect, app: &mut App) {
    let block = Block::default().borders(Borders::ALL).title("Status");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let parts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(14)])
        .split(inner);
    let status = Paragraph::new(app.status.clone()).style(Style::default().fg(Color::Cyan));
    f.render_widget(status, parts[0]);

    if app.is_busy() {
        let throbber = Throbber::default()
            .label(" Working...")
            .style(Style::default().fg(Color::Yellow))
            .throbber_set(BRAILLE_SIX)
            .use_type(WhichUse::Spin);
        f.render_stateful_widget(throbber, parts[1], &mut app.throbber_state);
    }
}

fn draw_modal(f: &mut Frame<'_>, modal: &Modal) {
    let area = f.area();
    match modal {
        Modal::AddSecret(form) => draw_form(f, "Add New Secret".into(), form, true),
        Modal::AddVersion { secret, form } => {
            draw_form(f, format!("Add New Version to '{secret}'"), form, false)
        }
        Modal::Notice {
            title,
            body,
            is_error,
        } => {
            let area_notice = centered_rect(50, 25, area);
            f.render_widget(Clear, area_notice);
            let bg = if *is_error { Color::Red } else { Color::Blue };
            let block = Block::default()
                .borders(Borders::ALL)
                .title(title.as_str())
                .title_alignment(Alignment::Center)
                .style(Style::default().bg(bg));
            let p = Paragraph::new(format!("\n{body}\n\n(Enter) OK"))
                .block(block)
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: false })
                .style(
                    Style::default()
                        .fg(Color::White)
                        .add_modifier(Modifier::BOLD),
                );
            f.render_widget(p, area_notice);
        }
        Modal::About => {
            let area_about = centered_rect(60, 70, area);
            f.render_widget(Clear, area_about);
            let block = Block::default()
                .borders(Borders::ALL)
                .title("About")
                .title_alignment(Alignment::Center)
                .style(Style::default().bg(Color::Black));
            let p = Paragraph::new(format!("{ABOUT_ART}\n{ABOUT_TEXT}\n\n(Enter) OK"))
                .block(block)
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::Cyan));
            f.render_widget(p, area_about);
        }
    }
}

fn draw_form(f: &mut Frame<'_>, title: String, form: &SecretForm, show_name: bool) {
    let area_modal = centered_rect(60, 50, f.area());
    f.render_widget(Clear, area_modal);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .title_alignment(Alignment::Center)
        .style(Style::default().bg(Color::Black));
    f.render_widget(block, area_modal);

    let mut fields = Vec::new();
    if show_name {
        fields.push((FormField::Name, "Secret Name", form.name.as_str()));
    }
    fields.push((FormField::Value, "Secret Value", form.value.as_str()));
    fields.push((
        FormField::ContentType,
        "Content Type (optional)",
        form.content_type.as_str(),
    ));

    let mut constraints: Vec<Constraint> = fields.iter().map(|_| Constraint::Length(3)).collect();
    constraints.push(Constraint::Length(1));
    constraints.push(Constraint::Min(1));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(2)
        .constraints(constraints)
        .split(area_modal);

    for (idx, (field, label, text)) in fields.iter().enumerate() {
        let style = if *field == form.field {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::White)
        };
        let p = Paragraph::new(*text)
            .block(Block::default().borders(Borders::ALL).title(*label))
            .style(style);
        f.render_widget(p, chunks[idx]);
    }

    let error = Paragraph::new(form.error.clone().unwrap_or_default())
        .style(Style::default().fg(Color::Red).add_modifier(Modifier::BOLD));
    f.render_widget(error, chunks[fields.len()]);

    let help = Paragraph::new("Tab: Switch field | Enter: Submit | Esc: Cancel")
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center);
    f.render_widget(help, chunks[fields.len() + 1]);
}

/// Helper to center a rect
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn version(id: &str, enabled: bool) -> SecretVersion {
        SecretVersion {
            version: id.into(),
            enabled,
            created: None,
            updated: None,
            content_type: None,
        }
    }

    #[test]
    fn vault_label_shows_resource_group() {
        let vault = Vault {
            name: "kv1".into(),
            subscription: String::new(),
            resource_group: "rg1".into(),
            id: String::new(),
        };
        assert_eq!(vault_label(&vault), "kv1 (rg1)");
    }

    #[test]
    fn secret_label_includes_content_type_when_set() {
        let mut secret = Secret {
            name: "db-password".into(),
            content_type: None,
            enabled: false,
            created: None,
            updated: None,
            id: String::new(),
        };
        assert_eq!(secret_label(&secret), "db-password ✗");

        secret.enabled = true;
        secret.content_type = Some("application/json".into());
        assert_eq!(secret_label(&secret), "db-password [application/json] ✓");

        secret.content_type = Some("  ".into());
        assert_eq!(secret_label(&secret), "db-password ✓");
    }

    #[test]
    fn version_label_truncates_id() {
        assert_eq!(
            version_label(&version("abcdef1234567890", true)),
            "✓ abcdef12... (N/A)"
        );
        assert_eq!(version_label(&version("abc", false)), "✗ abc... (N/A)");
    }

    #[test]
    fn version_label_formats_update_time_in_utc() {
        let mut v = version("abcdef1234567890", true);
        v.updated = Some(datetime!(2024-05-06 09:08:07 +02:00));
        assert_eq!(version_label(&v), "✓ abcdef12... (2024-05-06 07:08)");
    }

    #[test]
    fn idle_level_renders_nothing() {
        let level: Level<Vault> = Level::default();
        assert!(vault_lines(&level).is_empty());
    }

    #[test]
    fn value_placeholders() {
        assert_eq!(value_text(&ValueState::Idle), "");
        assert_eq!(value_text(&ValueState::Loading), "Loading...");
        assert_eq!(value_text(&ValueState::Loaded(String::new())), "(empty)");
        assert_eq!(value_text(&ValueState::Loaded("hunter2".into())), "hunter2");
        assert_eq!(value_text(&ValueState::Failed("boom".into())), "Error: boom");
    }

    #[test]
    fn centered_rect_stays_inside() {
        let outer = Rect::new(0, 0, 100, 40);
        let inner = centered_rect(60, 50, outer);
        assert!(inner.x >= outer.x && inner.right() <= outer.right());
        assert!(inner.y >= outer.y && inner.bottom() <= outer.bottom());
        assert_eq!(inner.width, 60);
    }
}
