//! Live line-oriented editing of one notepad

use std::sync::Arc;

use anyhow::Result;
use colored::*;
use padsync_client::{Notepad, RemoteClient, SessionEvent, SyncConfig};
use padsync_core::DocumentId;
use tokio::sync::broadcast;

use crate::lines::{self, Line};

pub async fn run(client: Arc<RemoteClient>, id: DocumentId, quiet: bool) -> Result<()> {
    let pad = Notepad::open(id.clone(), client.clone(), client, SyncConfig::default()).await?;
    let mut events = pad.subscribe_events();

    if !quiet {
        println!(
            "{}",
            format!("Editing {} as {}. Lines are appended; ':help' for commands.", id, pad.cursors().participant().display_name)
                .cyan()
        );
        if !pad.is_live() {
            println!("{}", "Live updates unavailable; changes from others will not show.".yellow());
        }
    }
    print_content(&pad.content());

    let mut input = lines::spawn_reader(format!("{}> ", id.as_str().green()), None);

    loop {
        tokio::select! {
            line = input.recv() => {
                let line = match line {
                    Some(Line::Text(line)) => line,
                    Some(Line::Interrupted) => continue,
                    Some(Line::Eof) | None => break,
                };

                match line.split_once(' ').unwrap_or((line.as_str(), "")) {
                    (":q", _) | (":quit", _) => break,
                    (":show", _) => print_content(&pad.content()),
                    (":who", _) => print_members(&pad),
                    (":set", text) => pad.edit(text),
                    (":clear", _) => pad.edit(""),
                    (":help", _) => print_help(),
                    (cmd, _) if cmd.starts_with(':') => {
                        println!("{} {}", "Unknown command".red(), cmd);
                    }
                    _ => pad.edit(append_line(&pad.content(), &line)),
                }
            }

            event = events.recv() => {
                match event {
                    Ok(SessionEvent::RemoteApplied { content }) => {
                        println!("{}", "-- updated by someone else --".blue());
                        print_content(&content);
                    }
                    Ok(SessionEvent::Saved { .. }) => println!("{}", "(saved)".dimmed()),
                    Ok(SessionEvent::Failed(notice)) => println!("{} {}", "Error:".red(), notice),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    let flushed = pad.session().flush().await;
    pad.close().await;
    flushed?;
    Ok(())
}

fn append_line(content: &str, line: &str) -> String {
    if content.is_empty() {
        line.to_string()
    } else if content.ends_with('\n') {
        format!("{}{}", content, line)
    } else {
        format!("{}\n{}", content, line)
    }
}

fn print_content(content: &str) {
    if content.is_empty() {
        println!("{}", "(empty)".dimmed());
    } else {
        println!("{}", content);
    }
}

fn print_members(pad: &Notepad) {
    let members = pad.members();
    if members.is_empty() {
        println!("{}", "(nobody else here)".dimmed());
    }
    for member in members {
        println!("{} {}", member.display_name.bold(), member.color.dimmed());
    }
}

fn print_help() {
    println!(
        r#"
  <text>        Append a line
  :set <text>   Replace the whole notepad
  :clear        Empty the notepad
  :show         Print the current content
  :who          Other participants
  :q, :quit     Save and exit
"#
    );
}
