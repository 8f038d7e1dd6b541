//! Raw protocol REPL

use anyhow::Result;
use colored::*;
use padsync_client::RemoteClient;
use padsync_protocol::Response;
use tokio::sync::broadcast;

use crate::lines::{self, Line};

pub async fn run(client: &RemoteClient) -> Result<()> {
    let mut pushes = client.pushes();
    let mut input = lines::spawn_reader(format!("{}> ", "padsync".green()), lines::history_file(".padsync_history"));

    loop {
        tokio::select! {
            line = input.recv() => {
                let line = match line {
                    Some(Line::Text(line)) => line,
                    Some(Line::Interrupted) => {
                        println!("^C");
                        continue;
                    }
                    Some(Line::Eof) | None => {
                        println!("^D");
                        break;
                    }
                };
                if line.is_empty() {
                    continue;
                }

                match line.to_uppercase().as_str() {
                    "QUIT" | "EXIT" => {
                        let _ = client.quit().await;
                        break;
                    }
                    "HELP" => {
                        print_help();
                        continue;
                    }
                    "CLEAR" => {
                        print!("\x1B[2J\x1B[1;1H");
                        continue;
                    }
                    _ => {}
                }

                match client.raw(&line).await {
                    Ok(response) => println!("{}", format_response(&response)),
                    Err(e) => {
                        eprintln!("{} {}", "Error:".red(), e);
                        eprintln!("{}", "Connection lost.".red());
                        break;
                    }
                }
            }

            push = pushes.recv() => {
                match push {
                    Ok(envelope) => {
                        let frame = Response::push(envelope.event).encode();
                        println!("{}", String::from_utf8_lossy(&frame).trim_end().blue());
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        println!("{}", format!("({} push frames skipped)", n).dimmed());
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

/// Render a reply for the terminal
pub fn format_response(response: &Response) -> String {
    match response {
        Response::Ok(None) => "OK".green().to_string(),
        Response::Ok(Some(msg)) => format!("OK {}", msg).green().to_string(),
        Response::Pong => "PONG".green().to_string(),
        Response::Error { code, message } => format!("(error) {} {}", code, message).red().to_string(),
        Response::Integer(n) => format!("(integer) {}", n).yellow().to_string(),
        Response::Null => "(nil)".dimmed().to_string(),
        Response::Bulk(data) => {
            let text = String::from_utf8_lossy(data);
            serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|value| serde_json::to_string_pretty(&value).ok())
                .unwrap_or_else(|| text.into_owned())
        }
        Response::Array(items) if items.is_empty() => "(empty array)".dimmed().to_string(),
        Response::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}) {}", i + 1, format_response(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        Response::Push(_) => {
            let frame = response.encode();
            String::from_utf8_lossy(&frame).trim_end().blue().to_string()
        }
    }
}

fn print_help() {
    println!(
        r#"
{}

{}
  AUTH <secret>                  Obtain the admin grant

{}
  GET <id>                       Fetch a notepad
  CREATE <id> ["content"]        Create a notepad unless it exists
  SET <id> "content"             Replace a notepad's content
  DEL <id>                       Delete a notepad (admin)
  KEYS [pattern]                 List notepad ids (admin)
  LIST [pattern]                 List notepads with content (admin)

{}
  SUB <id>                       Receive changes, cursors and presence
  UNSUB <id>                     Stop receiving them
  JOIN <id> <member json>        Announce presence
  CURSOR <id> <payload json>     Broadcast a cursor position
  LEAVE <id> <participant>       Withdraw presence
  WHO <id>                       Participants present

{}
  PING                           Check connection
  INFO                           Server information
  QUIT                           Close connection

{}
  help                           Show this help
  clear                          Clear screen
  quit/exit                      Exit CLI
"#,
        "padsync Commands".cyan().bold(),
        "Authentication".yellow().bold(),
        "Notepads".yellow().bold(),
        "Live".yellow().bold(),
        "Server".yellow().bold(),
        "Local".yellow().bold(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_plain_responses() {
        colored::control::set_override(false);

        assert_eq!(format_response(&Response::ok()), "OK");
        assert_eq!(format_response(&Response::integer(1)), "(integer) 1");
        assert_eq!(format_response(&Response::null()), "(nil)");
        assert_eq!(
            format_response(&Response::error("NOAUTH", "Admin authentication required")),
            "(error) NOAUTH Admin authentication required"
        );
        assert_eq!(
            format_response(&Response::array(vec![Response::bulk("a"), Response::bulk("b")])),
            "1) a\n2) b"
        );
    }

    #[test]
    fn test_format_bulk_json_is_pretty() {
        colored::control::set_override(false);

        let formatted = format_response(&Response::bulk(r#"{"id":"abc123"}"#));
        assert_eq!(formatted, "{\n  \"id\": \"abc123\"\n}");
    }
}
