//! Readline-based interface for interactive chat.
//!
//! Input comes from rustyline; responses stream in two sections, a dim
//! "Thinking" region that can fold to one line and a markdown "Response".

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::style::{Color, ResetColor, SetForegroundColor};
use crossterm::terminal::{size, Clear, ClearType};
use crossterm::ExecutableCommand;
use ratatui::style::{Modifier, Style};
use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::{Config, Editor};
use tracing::{debug, warn};

use deepchat_core::{Message, Role, SplitEvent, TurnEvent, Usage};

use crate::markdown::{render_markdown, MarkdownRenderer};

use super::{parse_user_input, ChatInterface, UserInput, HELP_TEXT};

const PROMPT: &str = "you> ";

fn thinking_style() -> Style {
    Style::default().add_modifier(Modifier::DIM)
}

/// Readline-based interface for terminal interaction.
pub struct ReadlineInterface {
    editor: Option<Editor<(), FileHistory>>,

    history_path: Option<PathBuf>,

    /// ANSI colours and in-place re-rendering (off when stdout is not a TTY).
    styled: bool,

    /// Fold the thinking region once the answer starts.
    collapse_thinking: bool,

    /// Pre-rendered logo and its title, shown by `initialize`.
    banner: Option<String>,
    title: Option<String>,

    thinking_renderer: MarkdownRenderer,
    content_renderer: MarkdownRenderer,
    in_thinking: bool,
    in_content: bool,

    /// Thinking text of the most recent turn, for /thinking.
    last_thinking: Option<String>,
}

impl ReadlineInterface {
    pub fn new(history_path: Option<PathBuf>, styled: bool, collapse_thinking: bool) -> Self {
        let mut interface = Self {
            editor: None,
            history_path,
            styled,
            collapse_thinking,
            banner: None,
            title: None,
            thinking_renderer: MarkdownRenderer::plain(),
            content_renderer: MarkdownRenderer::plain(),
            in_thinking: false,
            in_content: false,
            last_thinking: None,
        };
        interface.reset_renderers();
        interface
    }

    pub fn with_banner(mut self, banner: Option<String>, title: impl Into<String>) -> Self {
        self.banner = banner;
        self.title = Some(title.into());
        self
    }

    fn reset_renderers(&mut self) {
        if self.styled {
            self.thinking_renderer = MarkdownRenderer::new().with_base_style(thinking_style());
            self.content_renderer = MarkdownRenderer::new();
        } else {
            self.thinking_renderer = MarkdownRenderer::plain();
            self.content_renderer = MarkdownRenderer::plain();
        }
        self.in_thinking = false;
        self.in_content = false;
    }

    fn set_color(&self, color: Color) -> io::Result<()> {
        if self.styled {
            io::stdout().execute(SetForegroundColor(color))?;
        }
        Ok(())
    }

    fn reset_color(&self) -> io::Result<()> {
        if self.styled {
            io::stdout().execute(ResetColor)?;
        }
        Ok(())
    }

    /// Print a section header with styling.
    fn print_section_header(&self, title: &str) -> io::Result<()> {
        if !self.styled {
            println!("── {} ──", title);
            return Ok(());
        }

        let width = size().map(|(w, _)| w as usize).unwrap_or(80);
        let title_len = title.chars().count() + 2;
        let remaining = width.saturating_sub(title_len).saturating_sub(1);
        let left_len = remaining / 2;
        let right_len = remaining - left_len;

        let mut stdout = io::stdout();
        stdout.execute(SetForegroundColor(Color::DarkGrey))?;
        print!("{} ", "─".repeat(left_len));
        stdout.execute(SetForegroundColor(Color::Cyan))?;
        print!("{}", title);
        stdout.execute(SetForegroundColor(Color::DarkGrey))?;
        println!(" {}", "─".repeat(right_len));
        stdout.execute(ResetColor)?;
        stdout.flush()
    }

    fn print_dim(&self, text: &str) -> io::Result<()> {
        self.set_color(Color::DarkGrey)?;
        println!("{}", text);
        self.reset_color()?;
        io::stdout().flush()
    }

    fn print_markdown(&self, text: &str, dim: bool) {
        if self.styled {
            render_markdown(text, dim.then(thinking_style));
        } else {
            println!("{}", text);
        }
    }

    /// One-line stand-in for a folded thinking region.
    fn collapsed_line(thinking: &str) -> String {
        format!(
            "▸ Thinking complete ({} words) · /thinking to expand",
            thinking.split_whitespace().count()
        )
    }

    fn start_thinking(&mut self) -> io::Result<()> {
        if !self.in_thinking {
            self.print_section_header("Thinking...")?;
            self.in_thinking = true;
        }
        Ok(())
    }

    /// The closing marker arrived: fold or finalize the thinking region.
    fn complete_thinking(&mut self, thinking: String) -> io::Result<()> {
        if thinking.trim().is_empty() {
            if self.in_thinking {
                self.thinking_renderer.finish()?;
                self.in_thinking = false;
            }
            return Ok(());
        }

        self.start_thinking()?;
        self.thinking_renderer.set(&thinking)?;

        if self.collapse_thinking && self.styled {
            // Erase the streamed text, then overwrite the header line.
            self.thinking_renderer.clear()?;
            let mut stdout = io::stdout();
            stdout.execute(MoveUp(1))?;
            stdout.execute(Clear(ClearType::CurrentLine))?;
            stdout.execute(MoveToColumn(0))?;
            self.print_dim(&Self::collapsed_line(&thinking))?;
        } else {
            self.thinking_renderer.finish()?;
        }

        self.in_thinking = false;
        self.last_thinking = Some(thinking);
        Ok(())
    }

    fn show_answer(&mut self, answer: &str) -> io::Result<()> {
        if !self.in_content {
            if self.in_thinking {
                self.thinking_renderer.finish()?;
                self.in_thinking = false;
            }
            self.print_section_header("Response")?;
            self.in_content = true;
        }
        self.content_renderer.set(answer)
    }

    fn finish_sections(&mut self) -> io::Result<()> {
        if self.in_thinking {
            // No closing marker: everything was thinking, keep it visible
            self.thinking_renderer.finish()?;
            if !self.thinking_renderer.is_empty() {
                self.last_thinking = Some(self.thinking_renderer.content().to_string());
            }
            self.in_thinking = false;
        }
        if self.in_content {
            self.content_renderer.finish()?;
            self.in_content = false;
        }
        Ok(())
    }

    fn print_usage(&self, usage: &Usage) -> io::Result<()> {
        self.print_dim(&format!(
            "{} prompt · {} completion tokens",
            usage.prompt_tokens, usage.completion_tokens
        ))
    }
}

#[async_trait]
impl ChatInterface for ReadlineInterface {
    async fn initialize(&mut self) -> Result<()> {
        let config = Config::builder()
            .history_ignore_space(true)
            .history_ignore_dups(true)?
            .build();

        let mut editor: Editor<(), FileHistory> = Editor::with_config(config)?;

        if let Some(ref path) = self.history_path {
            if let Err(e) = editor.load_history(path) {
                debug!(path = %path.display(), error = %e, "No line history loaded");
            }
        }
        self.editor = Some(editor);

        if let Some(banner) = &self.banner {
            print!("{}", banner);
        }
        if let Some(title) = &self.title {
            self.set_color(Color::Cyan)?;
            println!("{}", title);
            self.reset_color()?;
        }
        self.print_dim("/help · /quit or Ctrl+D · Ctrl+C to clear the line")?;
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        if let (Some(editor), Some(path)) = (self.editor.as_mut(), self.history_path.as_ref()) {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = editor.save_history(path) {
                warn!(path = %path.display(), error = %e, "Failed to save line history");
            }
        }
        Ok(())
    }

    async fn next_input(&mut self) -> Result<Option<UserInput>> {
        let editor = self
            .editor
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Interface not initialized"))?;

        match editor.readline(PROMPT) {
            Ok(line) => {
                let _ = editor.add_history_entry(&line);
                Ok(Some(parse_user_input(&line)))
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                Ok(Some(UserInput::Cancel))
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                Ok(None)
            }
            Err(e) => Err(anyhow::anyhow!("Error reading input: {}", e)),
        }
    }

    fn emit(&mut self, event: TurnEvent) -> io::Result<()> {
        match event {
            TurnEvent::Started { model } => {
                debug!(%model, "Response started");
            }
            TurnEvent::Split(SplitEvent::Thinking(thinking)) => {
                self.start_thinking()?;
                self.thinking_renderer.set(&thinking)?;
            }
            TurnEvent::Split(SplitEvent::ThinkingComplete(thinking)) => {
                self.complete_thinking(thinking)?;
            }
            TurnEvent::Split(SplitEvent::Answer(answer)) => {
                self.show_answer(&answer)?;
            }
            TurnEvent::Finished { usage } => {
                self.finish_sections()?;
                if let Some(usage) = usage {
                    self.print_usage(&usage)?;
                }
            }
        }
        Ok(())
    }

    fn start_response(&mut self, _user_input: &str) {
        self.reset_renderers();
        self.last_thinking = None;
    }

    fn finish_response(&mut self) {
        // A failed turn can leave a section open; move past it.
        if let Err(e) = self.finish_sections() {
            debug!(error = %e, "Failed to finalize response output");
        }
    }

    fn show_message(&mut self, message: &Message) -> io::Result<()> {
        match message.role {
            Role::System => {}
            Role::User => {
                self.set_color(Color::Green)?;
                print!("{}", PROMPT);
                self.reset_color()?;
                println!("{}", message.content);
            }
            Role::Assistant => {
                if let Some(thinking) = &message.thinking {
                    if self.collapse_thinking {
                        self.print_dim(&Self::collapsed_line(thinking))?;
                    } else {
                        self.print_section_header("Thinking")?;
                        self.print_markdown(thinking, true);
                    }
                    self.last_thinking = Some(thinking.clone());
                }
                let answer = message.answer();
                if !answer.is_empty() {
                    self.print_section_header("Response")?;
                    self.print_markdown(answer, false);
                }
                println!();
            }
        }
        io::stdout().flush()
    }

    fn show_conversations(&mut self, names: &[String], active: &str) -> io::Result<()> {
        for (i, name) in names.iter().enumerate() {
            if name == active {
                self.set_color(Color::Green)?;
                println!("* {:>2}. {}", i + 1, name);
                self.reset_color()?;
            } else {
                println!("  {:>2}. {}", i + 1, name);
            }
        }
        io::stdout().flush()
    }

    fn show_status(&mut self, message: &str) -> io::Result<()> {
        self.set_color(Color::Cyan)?;
        println!("{}", message);
        self.reset_color()?;
        io::stdout().flush()
    }

    fn show_error(&mut self, message: &str) -> io::Result<()> {
        let mut stderr = io::stderr();
        if self.styled {
            stderr.execute(SetForegroundColor(Color::Red))?;
        }
        eprintln!("Error: {}", message);
        if self.styled {
            stderr.execute(ResetColor)?;
        }
        stderr.flush()
    }

    fn show_help(&mut self) -> io::Result<()> {
        self.print_dim(HELP_TEXT)
    }

    fn expand_thinking(&mut self) -> io::Result<()> {
        match self.last_thinking.clone() {
            Some(thinking) => {
                self.print_section_header("Thinking")?;
                self.print_markdown(&thinking, true);
                io::stdout().flush()
            }
            None => self.show_status("No thinking to show."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapsed_line_counts_words() {
        let line = ReadlineInterface::collapsed_line("The user asks for\nsimple arithmetic.");
        assert!(line.contains("(6 words)"));
        assert!(line.contains("/thinking"));
    }

    #[test]
    fn test_plain_turn_records_thinking() {
        let mut interface = ReadlineInterface::new(None, false, true);
        interface.start_response("What is 2+2?");

        interface
            .emit(TurnEvent::Split(SplitEvent::Thinking("The user asks".into())))
            .unwrap();
        interface
            .emit(TurnEvent::Split(SplitEvent::ThinkingComplete(
                "The user asks for simple arithmetic.".into(),
            )))
            .unwrap();
        interface
            .emit(TurnEvent::Split(SplitEvent::Answer("2+2 = 4".into())))
            .unwrap();
        interface.emit(TurnEvent::Finished { usage: None }).unwrap();
        interface.finish_response();

        assert_eq!(
            interface.last_thinking.as_deref(),
            Some("The user asks for simple arithmetic.")
        );
        assert!(!interface.in_thinking);
        assert!(!interface.in_content);
    }

    #[test]
    fn test_unclosed_thinking_is_kept() {
        let mut interface = ReadlineInterface::new(None, false, true);
        interface.start_response("hi");
        interface
            .emit(TurnEvent::Split(SplitEvent::Thinking("still pondering".into())))
            .unwrap();
        interface.emit(TurnEvent::Finished { usage: None }).unwrap();

        assert_eq!(interface.last_thinking.as_deref(), Some("still pondering"));
    }

    #[test]
    fn test_new_response_forgets_thinking() {
        let mut interface = ReadlineInterface::new(None, false, false);
        interface.last_thinking = Some("old".into());
        interface.start_response("next");
        assert!(interface.last_thinking.is_none());
    }
}
