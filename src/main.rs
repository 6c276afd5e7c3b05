// src/main.rs

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alias_match::config::{AppSettings, load_settings};
use alias_match::content::ThemeLibrary;
use alias_match::error::Result as AppResult;
use alias_match::game_logic::{
    MatchEvent, MatchRules, MatchSettings, RoundPhase, SystemClock, WordOutcome,
};
use alias_match::identity::Principal;
use alias_match::session::{MatchActorHandle, MatchSnapshot, SessionConfig, SessionDeps};
use alias_match::storage::{FileMatchStore, HttpLedger, LedgerSyncHandle};

const HELP: &str = "\
commands:
  themes                      list available themes
  new <theme#> <team,team..>  create a match with the configured rules
  start                       start the current team's round
  g | s                       mark the word on screen guessed / skipped
  flip <n>                    toggle entry n of the ended round's log
  confirm                     score the ended round (with any flips)
  status                      show the match
  leave                       abandon or close the match
  refresh                     reload themes
  quit";

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let app_settings = load_settings()?;
    tracing::info!("Configuration loaded: {:?}", app_settings);

    let library = ThemeLibrary::load(app_settings.themes.clone()).await?;
    tracing::info!(themes = library.themes().await.len(), "Themes loaded");

    let owner = Principal::from(&app_settings.player);
    let session = spawn_session(&app_settings)?;
    tokio::spawn(print_events(session.subscribe()));

    println!("{HELP}");
    let mut flips = BTreeSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let args: Vec<&str> = parts.collect();

        match command {
            "themes" => {
                for (i, theme) in library.themes().await.iter().enumerate() {
                    println!(
                        "{i}: {} [{} / {:?}] {} words, teams: {}",
                        theme.name,
                        theme.language,
                        theme.difficulty,
                        theme.words.len(),
                        theme.teams.join(", ")
                    );
                }
            }
            "new" => {
                let (Some(index), Some(teams)) = (
                    args.first().and_then(|s| s.parse::<usize>().ok()),
                    args.get(1),
                ) else {
                    println!("usage: new <theme#> <team,team..>");
                    continue;
                };
                let Some(theme) = library.themes().await.get(index).cloned() else {
                    println!("no theme {index}");
                    continue;
                };
                let teams = teams.split(',').map(|t| t.trim().to_string()).collect();
                match MatchSettings::new(theme, teams, MatchRules::from(&app_settings.rules)) {
                    Ok(settings) => {
                        flips.clear();
                        report(session.new_match(owner.clone(), settings).await);
                    }
                    Err(e) => println!("invalid settings: {e}"),
                }
            }
            "start" => report(session.start_round().await),
            "g" | "s" => report(session.decide(command == "g").await),
            "flip" => match args.first().and_then(|s| s.parse::<usize>().ok()) {
                Some(n) => {
                    if !flips.remove(&n) {
                        flips.insert(n);
                    }
                }
                None => println!("usage: flip <n>"),
            },
            "confirm" => {
                let Some(log) = pending_log(&session).await else {
                    println!("no round is awaiting confirmation");
                    continue;
                };
                let log = log
                    .into_iter()
                    .enumerate()
                    .map(|(i, mut outcome)| {
                        if flips.contains(&i) {
                            outcome.guessed = !outcome.guessed;
                        }
                        outcome
                    })
                    .collect();
                flips.clear();
                report(session.confirm_round(log).await);
            }
            "status" => match session.snapshot().await {
                Some(snapshot) => print_snapshot(&snapshot),
                None => println!("no match in progress"),
            },
            "leave" => match session.leave_match().await {
                Ok(()) => println!("match closed"),
                Err(e) => println!("error: {e}"),
            },
            "refresh" => match library.refresh().await {
                Ok(()) => println!("{} themes loaded", library.themes().await.len()),
                Err(e) => println!("refresh failed: {e}"),
            },
            "quit" => break,
            _ => println!("{HELP}"),
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

fn spawn_session(app_settings: &AppSettings) -> AppResult<MatchActorHandle> {
    let ledger = match app_settings.ledger.base_url.as_deref() {
        Some(base_url) => {
            let remote = HttpLedger::new(base_url, &app_settings.ledger)?;
            tracing::info!(base_url, "Remote ledger sync enabled");
            Some(LedgerSyncHandle::spawn(Arc::new(remote), 32))
        }
        None => None,
    };

    let deps = SessionDeps {
        store: Arc::new(FileMatchStore::new(&app_settings.storage.match_file)),
        ledger,
        clock: Arc::new(SystemClock),
        config: SessionConfig::from(&app_settings.engine),
    };
    Ok(MatchActorHandle::spawn(deps, 32))
}

async fn pending_log(session: &MatchActorHandle) -> Option<Vec<WordOutcome>> {
    match session.snapshot().await?.state.phase() {
        RoundPhase::Ended(ended) => Some(ended.log.clone()),
        _ => None,
    }
}

fn report<E: std::fmt::Display>(result: Result<MatchSnapshot, E>) {
    match result {
        Ok(snapshot) => {
            if let Some(word) = snapshot.state.current_word() {
                println!(">> {word}");
            }
        }
        Err(e) => println!("error: {e}"),
    }
}

fn print_snapshot(snapshot: &MatchSnapshot) {
    let state = &snapshot.state;
    println!(
        "theme: {}, round {}, turn: {}, phase: {}",
        state.settings().theme().name,
        state.round_number(),
        state.current_team(),
        state.phase().name()
    );
    for team in state.settings().teams() {
        println!("  {team}: {}", state.score(team));
    }
    if let Some(seconds) = snapshot.remaining_seconds {
        println!("  {seconds}s left");
    }
    if let RoundPhase::Ended(ended) = state.phase() {
        print_log(&ended.log);
    }
}

fn print_log(log: &[WordOutcome]) {
    for (i, outcome) in log.iter().enumerate() {
        let mark = if outcome.guessed { "+" } else { "-" };
        println!("  {i}: {mark} {}", outcome.word);
    }
}

async fn print_events(mut events: broadcast::Receiver<MatchEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            MatchEvent::RoundStarted {
                team, round_number, ..
            } => println!("round {round_number}: {team} is up"),
            MatchEvent::WordChanged { word } => println!(">> {word}"),
            MatchEvent::TimeRemaining { seconds } if seconds % 10 == 0 || seconds <= 5 => {
                println!("{seconds}s")
            }
            MatchEvent::RoundEnded {
                team,
                timed_out,
                log,
            } => {
                let why = if timed_out { "time is up" } else { "out of words" };
                println!("{team}'s round ended ({why}). flip entries, then confirm:");
                print_log(&log);
            }
            MatchEvent::RoundForfeited { team } => println!("{team} scored nothing this round"),
            MatchEvent::TeamScored { team, delta, score } => {
                println!("{team}: {delta:+} -> {score}")
            }
            MatchEvent::TurnChanged { team, .. } => println!("next up: {team}"),
            MatchEvent::GameOver { winners, reason } => {
                println!("game over ({reason:?}): {} won", winners.join(" & "))
            }
            MatchEvent::MatchCleared => println!("match cleared"),
            MatchEvent::TimeRemaining { .. } | MatchEvent::FullStateUpdate(_) => {}
        }
    }
}
