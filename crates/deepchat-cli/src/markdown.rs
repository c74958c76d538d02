//! Streaming markdown renderer for terminal output.
//!
//! Model output arrives in small fragments, so the renderer keeps the full
//! text of a section and re-renders it in place on every push. Parsing is done
//! with pulldown-cmark into ratatui `Text`, which is then converted to ANSI.

use std::io::{self, Write as _};

use crossterm::{
    cursor::{MoveToColumn, MoveUp},
    terminal::{size as terminal_size, Clear, ClearType},
    ExecutableCommand,
};
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
};

/// Style definitions for markdown elements.
struct MarkdownStyle {
    bold: Style,
    italic: Style,
    inline_code: Style,
    code_block: Style,
    h1: Style,
    h2: Style,
    h3: Style,
    h4_h6: Style,
    bullet: Style,
    blockquote: Style,
    link: Style,
    strikethrough: Style,
}

impl Default for MarkdownStyle {
    fn default() -> Self {
        Self {
            bold: Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            italic: Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::ITALIC),
            inline_code: Style::default().fg(Color::Yellow),
            code_block: Style::default().fg(Color::Yellow),
            h1: Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
            h2: Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
            h3: Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
            h4_h6: Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::ITALIC),
            bullet: Style::default().fg(Color::Cyan),
            blockquote: Style::default().fg(Color::DarkGray),
            link: Style::default()
                .fg(Color::Blue)
                .add_modifier(Modifier::UNDERLINED),
            strikethrough: Style::default().add_modifier(Modifier::CROSSED_OUT),
        }
    }
}

/// Render markdown to styled text.
pub fn render_to_text(content: &str) -> Text<'static> {
    let styles = MarkdownStyle::default();
    let parser = Parser::new_ext(content, Options::ENABLE_STRIKETHROUGH);

    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut current_spans: Vec<Span<'static>> = Vec::new();
    let mut style_stack: Vec<Style> = Vec::new();
    let mut had_paragraph = false;
    let mut in_code_block = false;
    let mut in_blockquote = false;

    // (is_ordered, next_number)
    let mut list_stack: Vec<(bool, u64)> = Vec::new();
    let mut pending_item_prefix: Option<Span<'static>> = None;
    let mut link_url: Option<String> = None;

    for event in parser {
        match event {
            Event::Start(Tag::Paragraph) => {
                if had_paragraph {
                    flush_line(&mut lines, &mut current_spans);
                }
            }
            Event::End(TagEnd::Paragraph) => {
                flush_line(&mut lines, &mut current_spans);
                if list_stack.is_empty() {
                    lines.push(Line::default());
                }
                had_paragraph = true;
            }

            Event::Start(Tag::Heading { level, .. }) => {
                let (style, prefix) = match level {
                    HeadingLevel::H1 => (styles.h1, "# "),
                    HeadingLevel::H2 => (styles.h2, "## "),
                    HeadingLevel::H3 => (styles.h3, "### "),
                    HeadingLevel::H4 => (styles.h4_h6, "#### "),
                    HeadingLevel::H5 => (styles.h4_h6, "##### "),
                    HeadingLevel::H6 => (styles.h4_h6, "###### "),
                };
                style_stack.push(style);
                current_spans.push(Span::styled(prefix, style));
            }
            Event::End(TagEnd::Heading(_)) => {
                style_stack.pop();
                flush_line(&mut lines, &mut current_spans);
                lines.push(Line::default());
                had_paragraph = true;
            }

            Event::Start(Tag::Strong) => style_stack.push(styles.bold),
            Event::Start(Tag::Emphasis) => style_stack.push(styles.italic),
            Event::Start(Tag::Strikethrough) => style_stack.push(styles.strikethrough),
            Event::End(TagEnd::Strong | TagEnd::Emphasis | TagEnd::Strikethrough) => {
                style_stack.pop();
            }

            Event::Start(Tag::BlockQuote(_)) => {
                in_blockquote = true;
                style_stack.push(styles.blockquote);
            }
            Event::End(TagEnd::BlockQuote(_)) => {
                in_blockquote = false;
                style_stack.pop();
                flush_line(&mut lines, &mut current_spans);
            }

            Event::Start(Tag::CodeBlock(_)) => {
                in_code_block = true;
                style_stack.push(styles.code_block);
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                style_stack.pop();
                flush_line(&mut lines, &mut current_spans);
                if lines.last().is_some_and(|l| !l.spans.is_empty()) {
                    lines.push(Line::default());
                }
            }

            Event::Start(Tag::List(start)) => {
                flush_line(&mut lines, &mut current_spans);
                list_stack.push((start.is_some(), start.unwrap_or(0)));
            }
            Event::End(TagEnd::List(_)) => {
                list_stack.pop();
                if list_stack.is_empty() && lines.last().is_none_or(|l| !l.spans.is_empty()) {
                    lines.push(Line::default());
                }
            }

            Event::Start(Tag::Item) => {
                flush_line(&mut lines, &mut current_spans);
                let indent = "  ".repeat(list_stack.len().saturating_sub(1));
                if let Some((is_ordered, num)) = list_stack.last_mut() {
                    let prefix = if *is_ordered {
                        *num += 1;
                        format!("{}{}. ", indent, *num - 1)
                    } else {
                        format!("{}- ", indent)
                    };
                    pending_item_prefix = Some(Span::styled(prefix, styles.bullet));
                }
            }
            Event::End(TagEnd::Item) => {
                flush_line(&mut lines, &mut current_spans);
            }

            Event::Start(Tag::Link { dest_url, .. }) => {
                link_url = Some(dest_url.to_string());
                style_stack.push(styles.link);
            }
            Event::End(TagEnd::Link) => {
                style_stack.pop();
                if let Some(url) = link_url.take() {
                    let style = effective_style(&style_stack);
                    current_spans.push(Span::styled(format!(" ({})", url), style));
                }
            }

            Event::Code(text) => {
                if let Some(prefix) = pending_item_prefix.take() {
                    current_spans.push(prefix);
                }
                current_spans.push(Span::styled(text.to_string(), styles.inline_code));
            }

            Event::Text(text) => {
                let style = effective_style(&style_stack);
                if let Some(prefix) = pending_item_prefix.take() {
                    current_spans.push(prefix);
                }

                if in_code_block || in_blockquote {
                    for (i, line) in text.split('\n').enumerate() {
                        if i > 0 {
                            flush_line(&mut lines, &mut current_spans);
                        }
                        if in_blockquote && (i > 0 || current_spans.is_empty()) {
                            current_spans.push(Span::styled("│ ", styles.blockquote));
                        }
                        if !line.is_empty() {
                            current_spans.push(Span::styled(line.to_string(), style));
                        }
                    }
                } else {
                    current_spans.push(Span::styled(text.to_string(), style));
                }
            }

            Event::SoftBreak => current_spans.push(Span::raw(" ")),
            Event::HardBreak => flush_line(&mut lines, &mut current_spans),

            Event::Rule => {
                flush_line(&mut lines, &mut current_spans);
                lines.push(Line::from(Span::styled(
                    "─".repeat(40),
                    Style::default().fg(Color::DarkGray),
                )));
                lines.push(Line::default());
            }

            _ => {}
        }
    }

    flush_line(&mut lines, &mut current_spans);

    while lines.last().is_some_and(|l| l.spans.is_empty()) {
        lines.pop();
    }

    Text::from(lines)
}

fn flush_line(lines: &mut Vec<Line<'static>>, spans: &mut Vec<Span<'static>>) {
    if spans.is_empty() {
        return;
    }
    lines.push(Line::from(std::mem::take(spans)));
}

/// Compute the effective style by patching all styles on the stack together.
fn effective_style(stack: &[Style]) -> Style {
    stack
        .iter()
        .fold(Style::default(), |style, s| style.patch(*s))
}

/// Apply `base` underneath every span, e.g. to dim a whole section.
fn apply_base_style(text: &mut Text<'static>, base: Style) {
    for line in &mut text.lines {
        for span in &mut line.spans {
            span.style = base.patch(span.style).add_modifier(base.add_modifier);
        }
    }
}

/// Convert ratatui `Text` to an ANSI-escaped string for direct terminal output.
pub fn text_to_ansi(text: &Text) -> String {
    let mut out = String::new();
    for (i, line) in text.lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for span in &line.spans {
            let codes = style_to_ansi(&span.style);
            if codes.is_empty() {
                out.push_str(&span.content);
            } else {
                out.push_str(&codes);
                out.push_str(&span.content);
                out.push_str("\x1b[0m");
            }
        }
    }
    out
}

/// Convert a ratatui Style to an ANSI SGR escape sequence.
fn style_to_ansi(style: &Style) -> String {
    let mut codes: Vec<String> = [
        (Modifier::BOLD, "1"),
        (Modifier::DIM, "2"),
        (Modifier::ITALIC, "3"),
        (Modifier::UNDERLINED, "4"),
        (Modifier::CROSSED_OUT, "9"),
    ]
    .iter()
    .filter(|(modifier, _)| style.add_modifier.contains(*modifier))
    .map(|(_, code)| code.to_string())
    .collect();

    if let Some(code) = style.fg.and_then(color_to_ansi_fg) {
        codes.push(code);
    }

    if codes.is_empty() {
        String::new()
    } else {
        format!("\x1b[{}m", codes.join(";"))
    }
}

/// Map a ratatui Color to an ANSI foreground color code.
fn color_to_ansi_fg(color: Color) -> Option<String> {
    let code = match color {
        Color::Black => "30",
        Color::Red => "31",
        Color::Green => "32",
        Color::Yellow => "33",
        Color::Blue => "34",
        Color::Magenta => "35",
        Color::Cyan => "36",
        Color::White | Color::Gray => "37",
        Color::DarkGray => "90",
        Color::LightRed => "91",
        Color::LightGreen => "92",
        Color::LightYellow => "93",
        Color::LightBlue => "94",
        Color::LightMagenta => "95",
        Color::LightCyan => "96",
        Color::Indexed(n) => return Some(format!("38;5;{}", n)),
        Color::Rgb(r, g, b) => return Some(format!("38;2;{};{};{}", r, g, b)),
        _ => return None,
    };
    Some(code.to_string())
}

/// Terminal rows taken by `text` when printed at `columns` wide.
fn wrapped_rows(text: &Text, columns: usize) -> u16 {
    let columns = columns.max(1);
    text.lines
        .iter()
        .map(|line| line.width().div_ceil(columns).max(1))
        .sum::<usize>()
        .min(u16::MAX as usize) as u16
}

/// A streaming markdown renderer that accumulates content and re-renders.
///
/// In plain mode (output is not a terminal) nothing is re-rendered: new text
/// is written through as it arrives.
pub struct MarkdownRenderer {
    content: String,
    /// Rows occupied by the last render; the cursor sits on the last one.
    rendered_rows: u16,
    columns: usize,
    base_style: Option<Style>,
    plain: bool,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let (width, _) = terminal_size().unwrap_or((80, 24));

        Self {
            content: String::new(),
            rendered_rows: 0,
            columns: width as usize,
            base_style: None,
            plain: false,
        }
    }

    /// Writes text through unformatted.
    pub fn plain() -> Self {
        Self {
            plain: true,
            ..Self::new()
        }
    }

    /// Render everything on top of `style` (used for the dim thinking section).
    pub fn with_base_style(mut self, style: Style) -> Self {
        self.base_style = Some(style);
        self
    }

    /// Add content and re-render.
    pub fn push(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.content.push_str(text);

        if self.plain {
            let mut stdout = io::stdout();
            stdout.write_all(text.as_bytes())?;
            return stdout.flush();
        }
        self.render()
    }

    /// Replace the content with a newer snapshot of the same section.
    pub fn set(&mut self, content: &str) -> io::Result<()> {
        if let Some(new) = content.strip_prefix(self.content.as_str()) {
            return self.push(new);
        }

        // Snapshot does not extend what is on screen; start over.
        self.clear()?;
        self.push(content)
    }

    /// Rendered form of the accumulated content.
    fn styled_text(&self) -> Text<'static> {
        let mut text = render_to_text(&self.content);
        if let Some(base) = self.base_style {
            apply_base_style(&mut text, base);
        }
        text
    }

    fn render(&mut self) -> io::Result<()> {
        self.erase()?;

        let text = self.styled_text();
        self.rendered_rows = wrapped_rows(&text, self.columns);

        let mut stdout = io::stdout();
        write!(stdout, "{}", text_to_ansi(&text))?;
        stdout.flush()
    }

    /// Move back to the first rendered row, clearing everything on the way.
    fn erase(&mut self) -> io::Result<()> {
        if self.rendered_rows == 0 {
            return Ok(());
        }

        let mut stdout = io::stdout();
        stdout.execute(Clear(ClearType::CurrentLine))?;
        for _ in 1..self.rendered_rows {
            stdout.execute(MoveUp(1))?;
            stdout.execute(Clear(ClearType::CurrentLine))?;
        }
        stdout.execute(MoveToColumn(0))?;
        self.rendered_rows = 0;
        Ok(())
    }

    /// Remove the section from the screen. The cursor is left where it began.
    pub fn clear(&mut self) -> io::Result<()> {
        if !self.plain {
            self.erase()?;
        }
        self.content.clear();
        Ok(())
    }

    /// End the section, leaving the cursor on a fresh line.
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.content.is_empty() {
            if !self.plain {
                self.render()?;
            }
            println!();
        }
        self.rendered_rows = 0;
        Ok(())
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Render markdown content to stdout (one-shot, non-streaming).
pub fn render_markdown(content: &str, base_style: Option<Style>) {
    let mut text = render_to_text(content);
    if let Some(base) = base_style {
        apply_base_style(&mut text, base);
    }
    println!("{}", text_to_ansi(&text));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_text(text: &Text) -> String {
        text.lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_render_to_text_basic() {
        let text = render_to_text("Hello world");
        assert_eq!(plain_text(&text), "Hello world");
    }

    #[test]
    fn test_render_bold_style() {
        let text = render_to_text("This is **bold** text");
        let bold: Vec<_> = text
            .lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .filter(|s| s.style.add_modifier.contains(Modifier::BOLD))
            .collect();
        assert!(bold.iter().any(|s| s.content.contains("bold")));
    }

    #[test]
    fn test_render_heading_styles() {
        let text = render_to_text("# Heading 1\n\n### Heading 3");
        let rendered = plain_text(&text);
        assert!(rendered.contains("# Heading 1"));
        assert!(text
            .lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .any(|s| s.style.fg == Some(Color::Green)));
    }

    #[test]
    fn test_render_lists() {
        let text = render_to_text("- one\n- two\n\n1. first\n2. second");
        let rendered = plain_text(&text);
        assert!(rendered.contains("- one"));
        assert!(rendered.contains("- two"));
        assert!(rendered.contains("1. first"));
        assert!(rendered.contains("2. second"));
    }

    #[test]
    fn test_render_code_block_lines() {
        let text = render_to_text("```\nfn main() {}\nlet x = 1;\n```");
        let rendered = plain_text(&text);
        assert!(rendered.contains("fn main() {}\nlet x = 1;"));
    }

    #[test]
    fn test_unterminated_markup_is_kept() {
        // Mid-stream content often has unclosed markup.
        let text = render_to_text("The answer is **4");
        assert!(plain_text(&text).contains("4"));
    }

    #[test]
    fn test_base_style_dims_everything() {
        let mut text = render_to_text("plain and **bold**");
        apply_base_style(&mut text, Style::default().add_modifier(Modifier::DIM));
        assert!(text
            .lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .all(|s| s.style.add_modifier.contains(Modifier::DIM)));
    }

    #[test]
    fn test_text_to_ansi() {
        let text = Text::from(vec![
            Line::from(Span::styled("hi", Style::default().fg(Color::Red))),
            Line::from("there"),
        ]);
        assert_eq!(text_to_ansi(&text), "\x1b[31mhi\x1b[0m\nthere");
    }

    #[test]
    fn test_set_snapshots() {
        let mut renderer = MarkdownRenderer::plain();
        renderer.set("The user").unwrap();
        renderer.set("The user asks").unwrap();
        assert_eq!(renderer.content(), "The user asks");

        renderer.set("Different").unwrap();
        assert_eq!(renderer.content(), "Different");

        renderer.clear().unwrap();
        assert!(renderer.is_empty());
    }

    #[test]
    fn test_wrapped_rows() {
        let text = Text::from(vec![
            Line::from("a".repeat(10)),
            Line::default(),
            Line::from("b".repeat(25)),
        ]);
        assert_eq!(wrapped_rows(&text, 10), 1 + 1 + 3);
        assert_eq!(wrapped_rows(&text, 80), 3);
    }
}
