//! Interface abstraction for interactive chat.
//!
//! The `ChatInterface` trait separates terminal concerns (input, rendering)
//! from the command loop in `chat.rs`, which drives the session controller.

mod readline;

pub use readline::ReadlineInterface;

use std::io;

use anyhow::Result;
use async_trait::async_trait;

use deepchat_core::{Message, Role, TurnEvent};

/// Commands that the interface can request.
#[derive(Debug, Clone, PartialEq)]
pub enum InterfaceCommand {
    /// Quit the application.
    Quit,

    /// Start a new conversation and make it active.
    NewChat,

    /// List conversations, marking the active one.
    ListChats,

    /// Switch to a conversation by name or by its number in the list.
    Switch(String),

    /// Replay the active conversation.
    History,

    /// Expand the last collapsed thinking region.
    Thinking,

    /// Show help.
    Help,
}

/// Input from the user via the interface.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    /// A regular message to send to the model.
    Message(String),

    /// A command from the user.
    Command(InterfaceCommand),

    /// The input line was abandoned (Ctrl+C).
    Cancel,

    /// No input (e.g., empty line).
    Empty,
}

/// Trait for user interfaces that can drive a chat session.
#[async_trait]
pub trait ChatInterface: Send {
    /// Initialize the interface (e.g., load line history).
    async fn initialize(&mut self) -> Result<()>;

    /// Clean up the interface (e.g., save line history).
    async fn cleanup(&mut self) -> Result<()>;

    /// Get the next user input. Returns None if the user quits.
    async fn next_input(&mut self) -> Result<Option<UserInput>>;

    /// Render one event of a running turn.
    fn emit(&mut self, event: TurnEvent) -> io::Result<()>;

    /// Prepare for a new response (called when user submits input).
    fn start_response(&mut self, user_input: &str);

    /// Finalize the response, successful or not.
    fn finish_response(&mut self);

    /// Show a stored message of the active conversation.
    fn show_message(&mut self, message: &Message) -> io::Result<()>;

    /// List conversation names in creation order with the active one marked.
    fn show_conversations(&mut self, names: &[String], active: &str) -> io::Result<()>;

    fn show_status(&mut self, message: &str) -> io::Result<()>;

    fn show_error(&mut self, message: &str) -> io::Result<()>;

    fn show_help(&mut self) -> io::Result<()>;

    /// Print the thinking text of the last collapsed turn, if any.
    fn expand_thinking(&mut self) -> io::Result<()>;

    /// Redraw a whole conversation after navigation.
    fn refresh(&mut self, name: &str, messages: &[Message]) -> io::Result<()> {
        self.show_status(&format!("── {} ──", name))?;
        for message in messages.iter().filter(|m| m.role != Role::System) {
            self.show_message(message)?;
        }
        Ok(())
    }
}

/// Parse a command from user input.
///
/// Returns None if the input is a regular message. Unknown slash commands are
/// sent to the model as messages.
pub fn parse_command(input: &str) -> Option<InterfaceCommand> {
    let trimmed = input.trim();

    if !trimmed.starts_with('/') {
        return None;
    }

    let parts: Vec<&str> = trimmed.splitn(2, char::is_whitespace).collect();
    let cmd = parts[0].to_lowercase();
    let arg = parts.get(1).map(|s| s.trim().to_string()).unwrap_or_default();

    match cmd.as_str() {
        "/quit" | "/exit" | "/q" => Some(InterfaceCommand::Quit),
        "/new" | "/n" => Some(InterfaceCommand::NewChat),
        "/chats" | "/list" | "/l" => Some(InterfaceCommand::ListChats),
        "/switch" | "/s" => {
            if arg.is_empty() {
                Some(InterfaceCommand::ListChats)
            } else {
                Some(InterfaceCommand::Switch(arg))
            }
        }
        "/history" | "/h" => Some(InterfaceCommand::History),
        "/thinking" | "/t" => Some(InterfaceCommand::Thinking),
        "/help" | "/?" => Some(InterfaceCommand::Help),
        _ => None,
    }
}

/// Parse user input into a UserInput enum.
pub fn parse_user_input(input: &str) -> UserInput {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return UserInput::Empty;
    }

    if let Some(cmd) = parse_command(trimmed) {
        UserInput::Command(cmd)
    } else {
        UserInput::Message(trimmed.to_string())
    }
}

pub const HELP_TEXT: &str = "\
Commands:
  /new, /n                 Start a new chat
  /chats, /list, /l        List chats (* marks the active one)
  /switch, /s <name|num>   Switch to a chat by name or list number
  /history, /h             Show the active chat again
  /thinking, /t            Expand the last collapsed thinking
  /help, /?                Show this help
  /quit, /exit, /q         Quit (or Ctrl+D)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_user_input(""), UserInput::Empty);
        assert_eq!(parse_user_input("   "), UserInput::Empty);
    }

    #[test]
    fn test_parse_message() {
        assert_eq!(
            parse_user_input("  What is 2+2?  "),
            UserInput::Message("What is 2+2?".to_string())
        );
    }

    #[test]
    fn test_parse_quit_command() {
        for input in ["/quit", "/exit", "/q", "/QUIT"] {
            assert_eq!(
                parse_user_input(input),
                UserInput::Command(InterfaceCommand::Quit),
                "{}",
                input
            );
        }
    }

    #[test]
    fn test_parse_navigation_commands() {
        assert_eq!(parse_command("/new"), Some(InterfaceCommand::NewChat));
        assert_eq!(parse_command("/n"), Some(InterfaceCommand::NewChat));
        assert_eq!(parse_command("/chats"), Some(InterfaceCommand::ListChats));
        assert_eq!(parse_command("/l"), Some(InterfaceCommand::ListChats));
        assert_eq!(parse_command("/history"), Some(InterfaceCommand::History));
        assert_eq!(parse_command("/t"), Some(InterfaceCommand::Thinking));
        assert_eq!(parse_command("/?"), Some(InterfaceCommand::Help));
    }

    #[test]
    fn test_parse_switch_command() {
        assert_eq!(
            parse_command("/switch Chat 2"),
            Some(InterfaceCommand::Switch("Chat 2".to_string()))
        );
        assert_eq!(
            parse_command("/s 3"),
            Some(InterfaceCommand::Switch("3".to_string()))
        );
        // Without an argument, show the list to pick from
        assert_eq!(parse_command("/switch"), Some(InterfaceCommand::ListChats));
    }

    #[test]
    fn test_parse_unknown_command() {
        // Unknown commands are treated as regular messages
        assert_eq!(
            parse_user_input("/unknown thing"),
            UserInput::Message("/unknown thing".to_string())
        );
    }
}
