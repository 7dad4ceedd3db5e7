use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use notevault::commands;
use notevault::config::Config;
use notevault::db::SqliteStore;
use notevault::{AppMutex, AppState};

const USAGE: &str = "usage: notevault <command> [args]

commands:
  new                 create an empty note
  list                list notes, newest first
  save                write notes and session settings now
  export              print an export bundle to stdout
  import <file>       merge an export bundle into the collection
  lock <id>           encrypt a note (password read from stdin)
  unlock <id>         decrypt a note (password read from stdin)
  check <id>          run the grammar checker over a note
  glossary <id>       extract and highlight glossary terms
  summarize <id>      fill in a note's summary and tags";

#[tokio::main]
async fn main() -> Result<()> {
    // Only log WARN and above in release builds to avoid leaking note content
    #[cfg(debug_assertions)]
    tracing_subscriber::fmt::init();
    #[cfg(not(debug_assertions))]
    tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();

    dotenv::dotenv().ok();
    let config = Config::from_env();
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let state = AppMutex::new(AppState::load(config, Arc::new(store))?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{USAGE}");
        return Ok(());
    };
    let target = args.get(1).map(String::as_str);

    match (command.as_str(), target) {
        ("new", _) => {
            let note = commands::new_note(&state).await;
            println!("{}", note.id);
        }
        ("list", _) => {
            for note in commands::list_notes(&state).await {
                let flag = if note.is_locked() { "locked" } else { "" };
                let pin = if note.pinned { "*" } else { " " };
                println!(
                    "{pin} {}  {}  {:<24} {flag}",
                    note.id,
                    note.updated_at.format("%Y-%m-%d %H:%M"),
                    display_title(&note.title),
                );
            }
        }
        ("save", _) => {}
        ("export", _) => println!("{}", commands::export_notes(&state).await?),
        ("import", Some(path)) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            let report = commands::import_notes(&state, &json).await?;
            println!("imported {} note(s)", report.imported);
            for id in report.skipped {
                println!("skipped {id}: already present");
            }
        }
        ("lock", Some(id)) => {
            let password = read_password().await?;
            commands::lock_note(&state, id, password).await?;
            println!("locked {id}");
        }
        ("unlock", Some(id)) => {
            let password = read_password().await?;
            commands::unlock_note(&state, id, password).await?;
            println!("unlocked {id}");
        }
        ("check", Some(id)) => {
            let applied = commands::check_note_grammar(&state, id).await?;
            println!("{applied} grammar issue(s) marked");
        }
        ("glossary", Some(id)) => {
            for term in commands::apply_glossary(&state, id).await? {
                println!("{}: {}", term.term, term.definition);
            }
        }
        ("summarize", Some(id)) => {
            println!("{}", commands::summarize_note(&state, id).await?);
        }
        (other, None) if ["import", "lock", "unlock", "check", "glossary", "summarize"].contains(&other) => {
            bail!("{other} needs an argument\n\n{USAGE}");
        }
        (other, _) => bail!("unknown command {other:?}\n\n{USAGE}"),
    }

    // The process exits before any debounce window would elapse.
    commands::save(&state).await?;
    Ok(())
}

fn display_title(title: &str) -> &str {
    if title.trim().is_empty() {
        "(untitled)"
    } else {
        title
    }
}

/// First line of stdin, without the line terminator.
async fn read_password() -> Result<String> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(password)
}
