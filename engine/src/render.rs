//! Markdown rendering of annotation lists for long-text columns.

use crate::annotation::{AnnotationRecord, DATETIME_FORMAT};

/// Render annotations as a markdown list, one item per record, in the order
/// given. Returns `None` for an empty list.
///
/// Each item quotes the passage, follows it with the user's note and ends
/// with an emphasized metadata line (datetime, chapter, page, kind):
///
/// ```text
/// - > It was a bright cold day in April
///   Note: opening line
///   *2021-03-14 10:00:00 · Part One · highlight*
/// ```
pub fn render_annotations(annotations: &[AnnotationRecord]) -> Option<String> {
    if annotations.is_empty() {
        return None;
    }

    let items: Vec<String> = annotations.iter().map(render_item).collect();
    Some(items.join("\n"))
}

fn render_item(annotation: &AnnotationRecord) -> String {
    let mut lines = Vec::new();

    if let Some(text) = &annotation.text {
        for line in text.trim().lines() {
            let line = line.trim_end();
            if line.is_empty() {
                lines.push(">".to_string());
            } else {
                lines.push(format!("> {}", escape_markdown(line)));
            }
        }
    }

    if let Some(note) = &annotation.note {
        let mut note_lines = note.trim().lines();
        if let Some(first) = note_lines.next() {
            lines.push(format!("Note: {}", escape_markdown(first.trim_end())));
        }
        lines.extend(note_lines.map(|l| escape_markdown(l.trim_end())));
    }

    lines.push(metadata_line(annotation));

    let mut item = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            item.push_str("- ");
        } else {
            item.push_str("\n  ");
        }
        item.push_str(line);
    }
    item
}

fn metadata_line(annotation: &AnnotationRecord) -> String {
    let mut parts = Vec::new();
    if let Some(datetime) = annotation.datetime {
        parts.push(datetime.format(DATETIME_FORMAT).to_string());
    }
    if let Some(chapter) = &annotation.chapter {
        parts.push(escape_markdown(chapter.trim()));
    }
    if let Some(pageno) = annotation.pageno {
        parts.push(format!("page {}", pageno));
    }
    parts.push(annotation.kind.to_string());
    format!("*{}*", parts.join(" · "))
}

/// Escape characters with markdown meaning so passages render literally.
pub fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + text.len() / 10);
    let mut chars = text.chars().peekable();
    let mut at_line_start = true;

    while let Some(c) = chars.next() {
        match c {
            '\\' => result.push_str("\\\\"),
            '*' | '_' | '[' | ']' | '`' | '|' | '<' | '>' => {
                result.push('\\');
                result.push(c);
            }
            '#' | '-' | '+' if at_line_start => {
                result.push('\\');
                result.push(c);
            }
            '!' if chars.peek() == Some(&'[') => {
                result.push('\\');
                result.push(c);
            }
            _ => result.push(c),
        }
        at_line_start = c == '\n';
    }

    result
}
