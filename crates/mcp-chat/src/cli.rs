//! The terminal chat loop.

mod markdown;

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mcp_chat_core::HistoryBuffer;
use owo_colors::OwoColorize;
use tokio::select;
use tokio::sync::mpsc;

use crate::AgentSession;
pub use markdown::render_markdown;

const BAR_CHAR: &str = "▎";
const RESET_HINT: &str = "You can continue with your next question or type \
                          'reset' to start a new conversation.";

/// A line that is handled by the loop instead of the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `exit`, `quit`, `bye` or `goodbye`.
    Exit,
    /// `reset`: forget the conversation.
    Reset,
}

/// Recognizes commands, ignoring case and surrounding whitespace.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim().to_lowercase();
    match line.as_str() {
        "exit" | "quit" | "bye" | "goodbye" => Some(Command::Exit),
        "reset" => Some(Command::Reset),
        _ => None,
    }
}

/// Why the loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The user typed an exit command.
    Command,
    /// An interrupt arrived while waiting for input.
    Interrupted,
    /// The input was closed.
    EndOfInput,
}

/// A read-eval-print loop around an [`AgentSession`].
///
/// Input lines and interrupts arrive on channels, so the binary can feed
/// them from stdin and Ctrl-C and tests from anywhere. A closed input
/// channel means end of input. An interrupt during a turn abandons the
/// turn; one while waiting for input ends the loop.
pub struct ChatLoop<'a, W> {
    session: &'a AgentSession,
    input: mpsc::UnboundedReceiver<String>,
    output: W,
    interrupts: mpsc::UnboundedReceiver<()>,
    history: HistoryBuffer,
    spinner: bool,
}

impl<'a, W: Write> ChatLoop<'a, W> {
    /// Creates a loop reading lines from `input` and printing to `output`.
    pub fn new(
        session: &'a AgentSession,
        input: mpsc::UnboundedReceiver<String>,
        output: W,
        interrupts: mpsc::UnboundedReceiver<()>,
    ) -> Self {
        Self {
            session,
            input,
            output,
            interrupts,
            history: HistoryBuffer::new(),
            spinner: false,
        }
    }

    /// Shows a spinner on stderr while the agent works.
    #[inline]
    pub fn with_spinner(mut self, spinner: bool) -> Self {
        self.spinner = spinner;
        self
    }

    /// Runs until the user leaves, then cleans the session up.
    ///
    /// The session is cleaned up on every way out, errors included, so a
    /// loop cannot be run twice on the same session.
    pub async fn run(&mut self) -> io::Result<LoopExit> {
        let result = self.run_loop().await;
        self.session.cleanup().await;
        result
    }

    async fn run_loop(&mut self) -> io::Result<LoopExit> {
        self.print_banner()?;

        loop {
            write!(self.output, "\n{} ", "[You]".bright_green().bold())?;
            self.output.flush()?;

            let line = select! {
                biased;
                Some(()) = self.interrupts.recv() => {
                    writeln!(
                        self.output,
                        "\n{}",
                        "Program interrupted by user. Exiting...".red().bold()
                    )?;
                    return Ok(LoopExit::Interrupted);
                }
                line = self.input.recv() => line,
            };
            let Some(line) = line else {
                writeln!(self.output, "\n{}", "Goodbye!".blue().bold())?;
                return Ok(LoopExit::EndOfInput);
            };

            let text = line.trim();
            match parse_command(text) {
                Some(Command::Exit) => {
                    writeln!(self.output, "{}", "Goodbye!".blue().bold())?;
                    return Ok(LoopExit::Command);
                }
                Some(Command::Reset) => {
                    self.history.reset();
                    let reset = "Conversation reset!".yellow();
                    let reset = reset.bold();
                    writeln!(self.output, "{reset}")?;
                    continue;
                }
                None if text.is_empty() => continue,
                None => {}
            }

            self.process(text).await?;
        }
    }

    async fn process(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.output, "\n{}", "[Assistant]".bright_cyan().bold())?;

        let progress_bar = self.spinner.then(thinking_spinner);
        let outcome = select! {
            biased;
            Some(()) = self.interrupts.recv() => None,
            result = self.session.submit(text, &self.history) => Some(result),
        };
        if let Some(progress_bar) = progress_bar {
            progress_bar.finish_and_clear();
        }

        match outcome {
            None => {
                debug!("turn abandoned");
                writeln!(
                    self.output,
                    "\n{}",
                    "Operation interrupted by user.".red().bold()
                )?;
            }
            Some(Ok(turn)) => {
                let rendered = render_markdown(&turn.response);
                for line in rendered.lines() {
                    writeln!(self.output, "{}{line}", BAR_CHAR.bright_cyan())?;
                }
                self.history = turn.history.trim();
            }
            Some(Err(err)) => {
                warn!("turn failed: {err}");
                let message = format!("[Error] {err}");
                writeln!(self.output, "\n{}", message.red().bold())?;
                writeln!(self.output, "{RESET_HINT}")?;
            }
        }
        Ok(())
    }

    fn print_banner(&mut self) -> io::Result<()> {
        writeln!(self.output, "{}", "=== MCP Chat ===".blue().bold())?;
        writeln!(
            self.output,
            "Type '{}' to quit the chat",
            "exit".green().bold()
        )?;
        writeln!(
            self.output,
            "Type '{}' to reset the conversation",
            "reset".yellow().bold()
        )
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }
}

fn thinking_spinner() -> ProgressBar {
    let progress_bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {wide_msg}") {
        progress_bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    progress_bar.set_message("🤔 Thinking...");
    progress_bar.enable_steady_tick(Duration::from_millis(100));
    progress_bar
}

/// Reads stdin line by line on a dedicated thread.
///
/// A blocking stdin read cannot be cancelled, so it must not live on the
/// runtime: an interrupted loop could never shut down. The channel closes
/// at end of input or on a read error.
pub fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = thread::Builder::new()
        .name("stdin".to_owned())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        error!("error reading input: {err}");
                        break;
                    }
                }
            }
        });
    if let Err(err) = spawned {
        error!("cannot start the input thread: {err}");
    }
    rx
}
