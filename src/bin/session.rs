// Interactive session front end.
//
// A line-oriented stand-in for the browser form: reads commands from stdin,
// forwards them to the session controller, and prints the updates the
// controller pushes back. Logs go to a file so the terminal stays usable
// for the prompt workflow.
//
// Commands:
//   p <text>      set the prompt (questions follow after the quiet period)
//   a <i> <text>  answer question i
//   r <i>         refine the prompt via question i
//   g             generate an image from the current prompt
//   v             request variations of the current image
//   q             quit

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

use promptlens::config;
use promptlens::protocol::{SessionCommand, SessionUpdate};
use promptlens::session::controller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Session front end starting up");

    let config = config::load_config().context("failed to load configuration")?;
    println!(
        "promptlens session - relay at {} (debounce {}ms)",
        config.session.relay_url, config.session.debounce_ms
    );
    println!("commands: p <text> | a <i> <text> | r <i> | g | v | q");

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (update_tx, update_rx) = mpsc::channel(64);

    let session = config.session.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller::run(&session, cmd_rx, update_tx).await {
            error!("Session controller error: {e}");
        }
    });

    let printer_handle = tokio::spawn(print_updates(update_rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(Some(SessionCommand::Quit)) => {
                let _ = cmd_tx.send(SessionCommand::Quit).await;
                break;
            }
            Ok(Some(cmd)) => {
                if cmd_tx.send(cmd).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(usage) => println!("{usage}"),
        }
    }
    drop(cmd_tx);

    let _ = controller_handle.await;
    printer_handle.abort();

    info!("Session front end shut down cleanly");
    Ok(())
}

/// Print controller updates as they arrive.
async fn print_updates(mut update_rx: mpsc::Receiver<SessionUpdate>) {
    while let Some(update) = update_rx.recv().await {
        match update {
            SessionUpdate::QuestionsChanged(questions) if questions.is_empty() => {
                println!("(questions cleared)");
            }
            SessionUpdate::QuestionsChanged(questions) => {
                println!("questions:");
                for (i, q) in questions.iter().enumerate() {
                    println!("  [{i}] {q}");
                }
            }
            SessionUpdate::PromptChanged(prompt) => {
                println!("prompt: {prompt}");
            }
            SessionUpdate::ImageChanged(url) => {
                println!("image: {url}");
            }
            SessionUpdate::Failed { operation, message } => {
                println!("{operation} failed: {message} (state unchanged, retry when ready)");
            }
        }
    }
}

/// Parse one input line into a command. `Ok(None)` for blank lines,
/// `Err(usage)` for unparsable input.
fn parse_command(line: &str) -> Result<Option<SessionCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head {
        "p" => Ok(Some(SessionCommand::EditPrompt(rest.to_string()))),
        "a" => {
            let (index, text) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: a <question index> <answer text>")?;
            let index = index
                .parse()
                .map_err(|_| "usage: a <question index> <answer text>".to_string())?;
            Ok(Some(SessionCommand::EditAnswer {
                index,
                text: text.trim().to_string(),
            }))
        }
        "r" => {
            let index = rest
                .parse()
                .map_err(|_| "usage: r <question index>".to_string())?;
            Ok(Some(SessionCommand::Refine { index }))
        }
        "g" => Ok(Some(SessionCommand::Submit)),
        "v" => Ok(Some(SessionCommand::Variations)),
        "q" => Ok(Some(SessionCommand::Quit)),
        other => Err(format!("unknown command: {other}")),
    }
}

/// Initialize tracing to a log file (the terminal belongs to the REPL).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("promptlens-session.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("promptlens=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
