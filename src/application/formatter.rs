//! Rendering of conversations and contact listings.
//!
//! Text, Markdown and HTML documents for the bundled writers, plus the
//! table view used by the command line.

use std::fmt::Write as _;

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

use crate::domain::{format_timestamp, Contact, ContactCatalog, ExportFormat, Message, MessageKind};

/// Label used for messages sent by the data owner.
const OWNER_LABEL: &str = "Me";

/// Renders a conversation in `format`, or `None` when no text renderer exists.
#[must_use]
pub fn render_conversation(
    format: ExportFormat,
    contact: &Contact,
    messages: &[Message],
) -> Option<String> {
    match format {
        ExportFormat::Txt => Some(render_txt(contact, messages)),
        ExportFormat::Markdown => Some(render_markdown(contact, messages)),
        ExportFormat::Html => Some(render_html(contact, messages)),
        ExportFormat::Docx | ExportFormat::Xlsx => None,
    }
}

/// Formats a conversation as plain text.
#[must_use]
pub fn render_txt(contact: &Contact, messages: &[Message]) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{} ({})", contact.display_label, contact.id);
    let _ = writeln!(out, "Messages: {}", messages.len());
    out.push_str(&"=".repeat(40));
    out.push_str("\n\n");

    for message in messages {
        let _ = writeln!(
            out,
            "{} {}",
            format_timestamp(message.created_at),
            speaker(contact, message)
        );
        out.push_str(&body(message));
        out.push_str("\n\n");
    }

    out
}

/// Formats a conversation as Markdown.
#[must_use]
pub fn render_markdown(contact: &Contact, messages: &[Message]) -> String {
    let mut out = String::new();

    let _ = write!(out, "# {}\n\n", contact.display_label);
    let _ = writeln!(out, "**WXID:** `{}`", contact.id);
    if !contact.alias.is_empty() {
        let _ = writeln!(out, "**Alias:** {}", contact.alias);
    }
    if contact.is_group {
        out.push_str("**Type:** group chat\n");
    }
    let _ = write!(out, "**Messages:** {}\n\n", messages.len());
    out.push_str("---\n\n");

    for message in messages {
        let _ = write!(
            out,
            "**{}** *{}*\n\n",
            speaker(contact, message),
            format_timestamp(message.created_at)
        );
        // Two trailing spaces keep line breaks inside one message.
        out.push_str(&body(message).replace('\n', "  \n"));
        out.push_str("\n\n");
    }

    out
}

/// Formats a conversation as a standalone HTML page.
#[must_use]
pub fn render_html(contact: &Contact, messages: &[Message]) -> String {
    let title = html_escape(&contact.display_label);
    let mut out = String::new();

    let _ = write!(
        out,
        r#"<!DOCTYPE html>
<html lang="zh-CN">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; max-width: 760px; margin: 2em auto; background: #f5f5f5; }}
.msg {{ margin: .6em 0; padding: .5em .8em; border-radius: 6px; background: #fff; }}
.msg.me {{ background: #d9f7be; margin-left: 20%; }}
.meta {{ color: #888; font-size: .85em; }}
.body {{ white-space: pre-wrap; word-break: break-word; }}
.system {{ text-align: center; color: #888; font-size: .85em; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p class="meta">{id} · {count} messages</p>
"#,
        id = html_escape(&contact.id),
        count = messages.len(),
    );

    for message in messages {
        if message.kind == MessageKind::System {
            let _ = writeln!(
                out,
                r#"<div class="system">{}</div>"#,
                html_escape(&body(message))
            );
            continue;
        }
        let class = if message.is_sender { "msg me" } else { "msg" };
        let _ = writeln!(
            out,
            r#"<div class="{class}"><div class="meta">{} · {}</div><div class="body">{}</div></div>"#,
            html_escape(&speaker(contact, message)),
            format_timestamp(message.created_at),
            html_escape(&body(message)),
        );
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn speaker(contact: &Contact, message: &Message) -> String {
    if message.is_sender {
        OWNER_LABEL.to_string()
    } else {
        message
            .sender
            .clone()
            .unwrap_or_else(|| contact.display_label.clone())
    }
}

/// Message text, or a placeholder for payloads that are not text.
fn body(message: &Message) -> String {
    message
        .kind
        .placeholder()
        .map_or_else(|| message.content.clone(), ToString::to_string)
}

/// Escape HTML entities
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Formats a table listing of contacts.
#[must_use]
pub fn format_contacts_table(contacts: &[Contact]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "WXID", "Name", "Group"]);

    for (i, contact) in contacts.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            truncate(&contact.id, 28),
            truncate(&contact.display_label, 32),
            if contact.is_group { "yes" } else { "" }.to_string(),
        ]);
    }

    table.to_string()
}

/// Formats catalog statistics for display.
#[must_use]
pub fn format_catalog_stats(catalog: &ContactCatalog) -> String {
    let groups = catalog.contacts.iter().filter(|c| c.is_group).count();
    format!(
        "{}\n  Contacts: {}\n  Group chats: {}\n  Skipped rows: {}",
        "📊 Statistics".bold(),
        catalog.contacts.len().to_string().cyan(),
        groups.to_string().green(),
        catalog.skipped.to_string().yellow()
    )
}

/// Truncates a string to max characters with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.lines().next().unwrap_or(s);
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
