//! Line commands read from stdin.

use std::str::FromStr;

use gesture_backend::TrainingService;
use gesture_session::{display_accuracy, Coordinator, SessionEvent, SessionSnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{broadcast, watch};

pub const HELP: &str = "\
Commands:
  collect <class>   start collecting samples (alias: c)
  stop              stop collecting (alias: s)
  train [class]     train the family, or one class (alias: t)
  predict           turn live prediction on or off (alias: p)
  reset [class]     delete samples and models of the family, or one class
  delete <class>    delete the samples of one class
  yes / no          confirm or cancel a pending reset or delete
  restart           restart the landmark pipeline
  status            show progress
  help              show this help
  quit              exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Collect(String),
    Stop,
    Train(Option<String>),
    Predict,
    Reset(Option<String>),
    Delete(String),
    Yes,
    No,
    Status,
    Restart,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let argument = words.next().map(str::to_string);
        if let Some(extra) = words.next() {
            return Err(format!("unexpected argument '{extra}'"));
        }

        let command = match (verb.to_lowercase().as_str(), argument) {
            ("collect" | "c", Some(label)) => Self::Collect(label),
            ("collect" | "c", None) => return Err("usage: collect <class>".to_string()),
            ("delete" | "del", Some(label)) => Self::Delete(label),
            ("delete" | "del", None) => return Err("usage: delete <class>".to_string()),
            ("train" | "t", label) => Self::Train(label),
            ("reset", label) => Self::Reset(label),
            ("stop" | "s", None) => Self::Stop,
            ("predict" | "p", None) => Self::Predict,
            ("yes" | "y", None) => Self::Yes,
            ("no" | "n", None) => Self::No,
            ("status" | "st", None) => Self::Status,
            ("restart", None) => Self::Restart,
            ("help" | "h" | "?", None) => Self::Help,
            ("quit" | "q" | "exit", None) => Self::Quit,
            (
                "stop" | "s" | "predict" | "p" | "yes" | "y" | "no" | "n" | "status" | "st"
                | "restart" | "help" | "h" | "?" | "quit" | "q" | "exit",
                Some(extra),
            ) => return Err(format!("unexpected argument '{extra}'")),
            (other, _) => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        Ok(command)
    }
}

/// Runs one command and returns the text to print.
pub async fn execute<B: TrainingService>(
    command: Command,
    coordinator: &Coordinator<B>,
    restart: &mpsc::Sender<()>,
) -> anyhow::Result<String> {
    let text = match command {
        Command::Collect(label) => coordinator.start_collecting(&label).await?.status_message,
        Command::Stop => coordinator.stop_collecting().await.status_message,
        Command::Train(label) => coordinator.train(label.as_deref()).await?.status_message,
        Command::Predict => coordinator.toggle_prediction().await.status_message,
        Command::Reset(None) => prompt(&coordinator.request_reset().await.message),
        Command::Reset(Some(label)) => {
            prompt(&coordinator.request_class_reset(&label).await?.message)
        }
        Command::Delete(label) => prompt(&coordinator.request_delete(&label).await?.message),
        Command::Yes => coordinator.confirm().await?.status_message,
        Command::No => {
            coordinator.cancel().await?;
            "Cancelled.".to_string()
        }
        Command::Status => render_status(&coordinator.snapshot().await),
        Command::Restart => request_restart(restart).to_string(),
        Command::Help => HELP.to_string(),
        Command::Quit => String::new(),
    };
    Ok(text)
}

/// Asks the pipeline supervisor for a restart.
fn request_restart(restart: &mpsc::Sender<()>) -> &'static str {
    match restart.try_send(()) {
        Ok(()) => "Restarting the landmark pipeline...",
        Err(TrySendError::Full(())) => "A restart is already pending.",
        Err(TrySendError::Closed(())) => "No landmark pipeline to restart.",
    }
}

fn prompt(message: &str) -> String {
    format!("{message} [yes/no]")
}

/// Progress table for `status`.
pub fn render_status(snapshot: &SessionSnapshot) -> String {
    let mut lines = vec![format!("{} | {}", snapshot.family, snapshot.mode)];
    for entry in &snapshot.progress {
        lines.push(format!(
            "  {:<4} {:>4}/{:<4} {:>5.1}%{}",
            entry.label.symbol(),
            entry.count,
            entry.max,
            entry.percentage,
            if entry.has_model { "  model" } else { "" }
        ));
    }
    lines.push(format!(
        "  total {}/{} ({:.1}%)",
        snapshot.total.samples, snapshot.total.max, snapshot.total.percentage
    ));
    if let Some(accuracy) = snapshot.training_accuracy {
        lines.push(format!("  accuracy {:.1}%", display_accuracy(accuracy)));
    }
    if let (Some(label), Some(confidence)) = (&snapshot.prediction, snapshot.confidence) {
        lines.push(format!("  prediction {label} ({:.0}%)", confidence * 100.0));
    }
    lines.push(format!("  {}", snapshot.status_message));
    lines.join("\n")
}

/// Reads commands until `quit` or end of input. Only `quit` requests shutdown.
pub async fn run<B: TrainingService>(
    coordinator: Coordinator<B>,
    restart: mpsc::Sender<()>,
    quit: watch::Sender<bool>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Type 'help' for commands.");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("Console input closed");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Console input failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => {
                quit.send_replace(true);
                return;
            }
            Ok(command) => match execute(command, &coordinator, &restart).await {
                Ok(text) => println!("{text}"),
                Err(e) => println!("{e}"),
            },
            Err(e) => println!("{e}"),
        }
    }
}

/// Prints status messages, predictions and pipeline errors as they happen.
pub async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    let mut last_status = String::new();
    let mut last_prediction: Option<String> = None;
    loop {
        match events.recv().await {
            Ok(SessionEvent::Session(payload)) => {
                let session = payload.session;
                if session.status_message != last_status {
                    println!("> {}", session.status_message);
                    last_status = session.status_message;
                }
            }
            Ok(SessionEvent::Prediction(prediction)) => {
                if last_prediction.as_deref() != Some(prediction.label.as_str()) {
                    println!(
                        "> prediction: {} ({:.0}%)",
                        prediction.label,
                        prediction.confidence * 100.0
                    );
                    last_prediction = Some(prediction.label);
                }
            }
            Ok(SessionEvent::Error(error)) => println!("! {}", error.message),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
