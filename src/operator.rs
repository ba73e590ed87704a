//! Operator command channel.
//!
//! Console lines become [`OperatorIntent`]s, and intents with a wire form are sent to
//! the motion controller through the shared [`LineWriter`]. Writes are
//! fire-and-forget; the controller's own chatter comes back on the main loop and is
//! ignored there.

use crate::lifecycle::RunningFlag;
use crate::transport::LineWriter;
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Console help text.
pub const HELP: &str = "\
Commands:
  home   home the rig (HOME)
  zero   set current position as zero (ZERO)
  a / d  jog one small step left / right
  A / D  jog one large step left / right
  help   show this text
  q      quit";

/// Jog key accepted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JogKey(char);

impl JogKey {
    /// Accepts `a`, `d`, `A` or `D`
    pub fn new(key: char) -> Option<Self> {
        matches!(key, 'a' | 'd' | 'A' | 'D').then_some(JogKey(key))
    }

    /// The key character
    pub fn key(self) -> char {
        self.0
    }
}

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorIntent {
    /// Send `HOME`
    Home,
    /// Send `ZERO`
    Zero,
    /// Send `JOG <key>`
    Jog(JogKey),
    /// Print the help text
    Help,
    /// Stop the bridge
    Quit,
    /// Unrecognised input
    Unknown(String),
}

impl OperatorIntent {
    /// Map one console line. Blank input yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let intent = match text {
            "" => return None,
            "home" => OperatorIntent::Home,
            "zero" => OperatorIntent::Zero,
            "help" => OperatorIntent::Help,
            "q" => OperatorIntent::Quit,
            other => {
                let mut chars = other.chars();
                match (chars.next().and_then(JogKey::new), chars.next()) {
                    (Some(key), None) => OperatorIntent::Jog(key),
                    _ => OperatorIntent::Unknown(other.to_string()),
                }
            }
        };
        Some(intent)
    }

    /// Wire frame for this intent, if it has one
    pub fn frame(&self) -> Option<String> {
        match self {
            OperatorIntent::Home => Some("HOME".to_string()),
            OperatorIntent::Zero => Some("ZERO".to_string()),
            OperatorIntent::Jog(key) => Some(format!("JOG {}", key.key())),
            OperatorIntent::Help | OperatorIntent::Quit | OperatorIntent::Unknown(_) => None,
        }
    }
}

/// Forwards operator intents to the controller until the running flag clears.
pub struct OperatorChannel {
    writer: LineWriter,
    flag: RunningFlag,
}

impl OperatorChannel {
    /// Channel writing through `writer`
    pub fn new(writer: LineWriter, flag: RunningFlag) -> Self {
        Self { writer, flag }
    }

    /// Consume console lines until quit, source exhaustion, a write failure, or the
    /// running flag being cleared elsewhere.
    pub async fn run(self, mut source: mpsc::Receiver<String>) {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.flag.stopped() => break,
                line = source.recv() => line,
            };

            let Some(line) = line else {
                self.flag.stop("operator input closed");
                break;
            };
            let Some(intent) = OperatorIntent::parse(&line) else {
                continue;
            };

            match intent {
                OperatorIntent::Quit => {
                    self.flag.stop("operator quit");
                    break;
                }
                OperatorIntent::Help => println!("{HELP}"),
                OperatorIntent::Unknown(text) => {
                    warn!(input = %text, "Unknown operator command (type 'help')");
                }
                intent => {
                    let Some(frame) = intent.frame() else {
                        continue;
                    };
                    if let Err(e) = self.writer.write_line(&frame).await {
                        warn!(frame = %frame, error = %e, "Operator command not sent");
                        self.flag.stop("operator write failed");
                        break;
                    }
                    info!(frame = %frame, "Operator command sent");
                }
            }
        }
        debug!("Operator channel stopped");
    }
}

/// Read stdin lines on a dedicated thread and feed them into a channel.
///
/// End of input drops the sender, which the channel treats as quit. The thread exits
/// on its own once the receiver is gone and the next line arrives.
pub fn spawn_stdin_source() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("operator-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
