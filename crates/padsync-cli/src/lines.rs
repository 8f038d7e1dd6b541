//! Line input on a dedicated thread, so the async side can keep printing
//! remote updates while the user types

use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;

pub enum Line {
    Text(String),
    Interrupted,
    Eof,
}

pub fn spawn_reader(prompt: String, history: Option<PathBuf>) -> mpsc::Receiver<Line> {
    let (tx, rx) = mpsc::channel(16);

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(err) => {
                eprintln!("Error: {}", err);
                let _ = tx.blocking_send(Line::Eof);
                return;
            }
        };
        if let Some(path) = &history {
            let _ = rl.load_history(path);
        }

        loop {
            let line = match rl.readline(&prompt) {
                Ok(text) => {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        let _ = rl.add_history_entry(text.as_str());
                        if let Some(path) = &history {
                            let _ = rl.save_history(path);
                        }
                    }
                    Line::Text(text)
                }
                Err(ReadlineError::Interrupted) => Line::Interrupted,
                Err(ReadlineError::Eof) => Line::Eof,
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    Line::Eof
                }
            };

            let done = matches!(line, Line::Eof);
            if tx.blocking_send(line).is_err() || done {
                break;
            }
        }
    });

    rx
}

pub fn history_file(name: &str) -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(name))
}
