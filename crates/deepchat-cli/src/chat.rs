//! Interactive chat loop and one-shot mode.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use deepchat_core::{Error, SessionController, TurnEvent, TurnSink};

use crate::interface::{ChatInterface, InterfaceCommand, UserInput};

/// Forwards turn events to the terminal as they arrive.
struct InterfaceSink<'a> {
    interface: &'a mut dyn ChatInterface,
}

impl TurnSink for InterfaceSink<'_> {
    fn emit(&mut self, event: TurnEvent) -> Result<(), Error> {
        self.interface
            .emit(event)
            .map_err(|e| Error::sink(e.to_string()))
    }
}

/// Run the interactive loop until the user quits.
pub async fn run_chat(
    interface: &mut dyn ChatInterface,
    controller: &mut SessionController,
) -> Result<()> {
    interface.initialize().await?;
    let result = chat_loop(interface, controller).await;
    interface.cleanup().await?;
    result
}

async fn chat_loop(
    interface: &mut dyn ChatInterface,
    controller: &mut SessionController,
) -> Result<()> {
    while let Some(input) = interface.next_input().await? {
        match input {
            UserInput::Empty | UserInput::Cancel => continue,
            UserInput::Command(command) => {
                if !handle_command(interface, controller, command)? {
                    break;
                }
            }
            UserInput::Message(text) => run_turn(interface, controller, &text).await?,
        }
    }
    Ok(())
}

/// Execute a navigation command. Returns false when the loop should end.
fn handle_command(
    interface: &mut dyn ChatInterface,
    controller: &mut SessionController,
    command: InterfaceCommand,
) -> Result<bool> {
    debug!(?command, "Command");

    match command {
        InterfaceCommand::Quit => return Ok(false),
        InterfaceCommand::NewChat => match controller.new_conversation() {
            Ok(_) => refresh_active(interface, controller)?,
            Err(e) => interface.show_error(&e.to_string())?,
        },
        InterfaceCommand::ListChats => {
            let names = owned_names(controller);
            interface.show_conversations(&names, controller.active_name())?;
        }
        InterfaceCommand::Switch(target) => {
            let name = resolve_conversation(controller, &target);
            match controller.select(&name) {
                Ok(()) => refresh_active(interface, controller)?,
                Err(Error::ConversationNotFound(_)) => {
                    interface.show_error(&format!(
                        "No chat named '{}'. Use /chats to list them.",
                        target
                    ))?;
                }
                Err(e) => interface.show_error(&e.to_string())?,
            }
        }
        InterfaceCommand::History => refresh_active(interface, controller)?,
        InterfaceCommand::Thinking => interface.expand_thinking()?,
        InterfaceCommand::Help => interface.show_help()?,
    }
    Ok(true)
}

fn owned_names(controller: &SessionController) -> Vec<String> {
    controller
        .conversation_names()
        .into_iter()
        .map(String::from)
        .collect()
}

/// Accept either a 1-based position in the list or a conversation name.
fn resolve_conversation(controller: &SessionController, target: &str) -> String {
    let names = controller.conversation_names();
    match target.parse::<usize>() {
        Ok(n) if (1..=names.len()).contains(&n) && !names.contains(&target) => {
            names[n - 1].to_string()
        }
        _ => target.to_string(),
    }
}

fn refresh_active(
    interface: &mut dyn ChatInterface,
    controller: &SessionController,
) -> Result<()> {
    let conversation = controller.active_conversation()?;
    interface.refresh(conversation.name(), conversation.messages())?;
    Ok(())
}

/// Submit one message and render the reply. Backend failures are shown and
/// the session continues; anything else ends the loop.
async fn run_turn(
    interface: &mut dyn ChatInterface,
    controller: &mut SessionController,
    text: &str,
) -> Result<()> {
    interface.start_response(text);
    let result = {
        let mut sink = InterfaceSink {
            interface: &mut *interface,
        };
        controller.submit_user_message(text, &mut sink).await
    };
    interface.finish_response();

    match result {
        Ok(output) => {
            debug!(
                thinking_len = output.thinking.len(),
                answer_len = output.answer.len(),
                "Turn rendered"
            );
            Ok(())
        }
        Err(e) if e.is_backend_failure() => {
            warn!(error = %e, conversation = %controller.active_name(), "Turn failed");
            interface.show_error(&e.to_string())?;
            Ok(())
        }
        Err(Error::Sink(message)) => Err(anyhow::anyhow!("Terminal output failed: {}", message)),
        Err(e) => Err(e).context("Turn failed"),
    }
}

/// Answer a single prompt in a fresh session and return.
pub async fn run_once(
    interface: &mut dyn ChatInterface,
    controller: &mut SessionController,
    prompt: &str,
) -> Result<()> {
    interface.start_response(prompt);
    let result = {
        let mut sink = InterfaceSink {
            interface: &mut *interface,
        };
        controller.submit_user_message(prompt, &mut sink).await
    };
    interface.finish_response();

    result.map(|_| ()).context("Request failed")
}
