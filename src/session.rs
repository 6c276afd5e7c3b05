use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::MatchError;
use crate::game_logic::{
    Clock, MatchEffect, MatchEvent, MatchSettings, MatchState, RoundPhase, RoundTicker,
    TickerEvent, WordOutcome,
};
use crate::identity::Principal;
use crate::storage::{LedgerSyncHandle, MatchStore, restore};

const EVENT_BUFFER: usize = 64;
const TICKER_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub tick_interval: StdDuration,
    pub auto_start_delay: StdDuration,
}

impl From<&EngineConfig> for SessionConfig {
    fn from(engine: &EngineConfig) -> Self {
        Self {
            tick_interval: StdDuration::from_millis(engine.tick_interval_ms),
            auto_start_delay: StdDuration::from_millis(engine.auto_start_delay_ms),
        }
    }
}

/// Collaborators the session actor runs against.
pub struct SessionDeps {
    pub store: Arc<dyn MatchStore>,
    pub ledger: Option<LedgerSyncHandle>,
    pub clock: Arc<dyn Clock>,
    pub config: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSnapshot {
    pub state: MatchState,
    pub remaining_seconds: Option<u64>,
}

type Reply<T> = oneshot::Sender<Result<T, MatchError>>;

#[derive(Debug)]
pub enum MatchActorMessage {
    NewMatch {
        owner: Principal,
        settings: Box<MatchSettings>,
        respond_to: Reply<MatchSnapshot>,
    },
    StartRound {
        respond_to: Reply<MatchSnapshot>,
    },
    Decide {
        guessed: bool,
        respond_to: Reply<MatchSnapshot>,
    },
    ConfirmRound {
        log: Vec<WordOutcome>,
        respond_to: Reply<MatchSnapshot>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<Option<MatchSnapshot>>,
    },
    LeaveMatch {
        respond_to: Reply<()>,
    },
    AutoStartRound {
        team_index: usize,
        round_number: u32,
    },
}

pub struct MatchActor {
    receiver: mpsc::Receiver<MatchActorMessage>,
    self_sender: mpsc::WeakSender<MatchActorMessage>,
    ticker_tx: mpsc::Sender<TickerEvent>,
    ticker_rx: mpsc::Receiver<TickerEvent>,
    events: broadcast::Sender<MatchEvent>,
    state: Option<MatchState>,
    store: Arc<dyn MatchStore>,
    ledger: Option<LedgerSyncHandle>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    rng: StdRng,
    ticker: Option<RoundTicker>,
    auto_start: Option<JoinHandle<()>>,
    store_dirty: bool,
}

impl MatchActor {
    fn new(
        receiver: mpsc::Receiver<MatchActorMessage>,
        self_sender: mpsc::WeakSender<MatchActorMessage>,
        events: broadcast::Sender<MatchEvent>,
        deps: SessionDeps,
    ) -> Self {
        let (ticker_tx, ticker_rx) = mpsc::channel(TICKER_BUFFER);
        MatchActor {
            receiver,
            self_sender,
            ticker_tx,
            ticker_rx,
            events,
            state: None,
            store: deps.store,
            ledger: deps.ledger,
            clock: deps.clock,
            config: deps.config,
            rng: StdRng::from_entropy(),
            ticker: None,
            auto_start: None,
            store_dirty: false,
        }
    }

    async fn resume(&mut self) {
        self.state = restore(self.store.as_ref()).await;
        let Some(state) = self.state.as_ref() else {
            return;
        };
        if let Some(ledger) = &self.ledger {
            ledger.resume(state);
        }
        if let RoundPhase::Active(round) = state.phase() {
            tracing::info!(
                match.id = %state.id(),
                round.started_at = %round.started_at,
                "Resuming round clock"
            );
            self.ticker = Some(self.spawn_ticker(round.started_at, state.settings().round_seconds()));
        } else if state.auto_start_pending() {
            let (team_index, round_number) = (state.team_index(), state.round_number());
            tracing::info!(match.id = %state.id(), team = %state.current_team(), "Re-arming auto-start");
            self.schedule_auto_start(team_index, round_number);
        }
        self.broadcast_full_state();
    }

    #[tracing::instrument(skip(self, msg), fields(
        match.id = ?self.state.as_ref().map(|s| s.id()),
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: MatchActorMessage) {
        match msg {
            MatchActorMessage::NewMatch {
                owner,
                settings,
                respond_to,
            } => {
                let result = self.new_match(owner, *settings).await;
                let _ = respond_to.send(result);
            }
            MatchActorMessage::StartRound { respond_to } => {
                let now = self.clock.now();
                let result = match self.state.as_mut() {
                    Some(state) => state.start_round(now, &mut self.rng),
                    None => Err(MatchError::NoMatch),
                };
                let result = self.commit(result).await;
                let _ = respond_to.send(result);
            }
            MatchActorMessage::Decide {
                guessed,
                respond_to,
            } => {
                let now = self.clock.now();
                let result = match self.state.as_mut() {
                    Some(state) => state.decide(guessed, now),
                    None => Err(MatchError::NoMatch),
                };
                let result = self.commit(result).await;
                let _ = respond_to.send(result);
            }
            MatchActorMessage::ConfirmRound { log, respond_to } => {
                let now = self.clock.now();
                let result = match self.state.as_mut() {
                    Some(state) => state.apply_round_outcome(log, now),
                    None => Err(MatchError::NoMatch),
                };
                let result = self.commit(result).await;
                let _ = respond_to.send(result);
            }
            MatchActorMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            MatchActorMessage::LeaveMatch { respond_to } => {
                let result = self.leave_match().await;
                let _ = respond_to.send(result);
            }
            MatchActorMessage::AutoStartRound {
                team_index,
                round_number,
            } => {
                self.auto_start = None;
                let now = self.clock.now();
                let Some(state) = self.state.as_mut() else {
                    return;
                };
                let still_due = matches!(state.phase(), RoundPhase::Idle)
                    && state.team_index() == team_index
                    && state.round_number() == round_number;
                if !still_due {
                    tracing::debug!("Ignoring stale auto-start");
                    return;
                }
                tracing::info!(team = %state.current_team(), "Auto-starting next round");
                let result = state.start_round(now, &mut self.rng);
                if let Err(e) = self.commit(result).await {
                    tracing::warn!(error = %e, "Auto-start failed");
                }
            }
        }
    }

    async fn handle_ticker_event(&mut self, event: TickerEvent) {
        match event {
            TickerEvent::Remaining {
                round_started_at,
                seconds,
            } => {
                let current = matches!(
                    self.state.as_ref().map(|s| s.phase()),
                    Some(RoundPhase::Active(round)) if round.started_at == round_started_at
                );
                if current {
                    let _ = self.events.send(MatchEvent::TimeRemaining { seconds });
                }
                if self.store_dirty {
                    self.persist().await;
                }
            }
            TickerEvent::TimedOut { round_started_at } => {
                let now = self.clock.now();
                let Some(state) = self.state.as_mut() else {
                    tracing::debug!("Timeout with no match in progress");
                    return;
                };
                let effects = state.time_out(round_started_at, now);
                if !effects.is_empty() {
                    self.after_transition(effects).await;
                }
            }
        }
    }

    async fn new_match(
        &mut self,
        owner: Principal,
        settings: MatchSettings,
    ) -> Result<MatchSnapshot, MatchError> {
        if let Some(previous) = self.state.take() {
            tracing::warn!(match.id = %previous.id(), "Replacing unfinished match");
            if let Some(ledger) = &self.ledger {
                ledger.close(previous.id(), self.clock.now());
            }
        }
        self.cancel_round_tasks();

        let state = MatchState::new(settings, &owner, self.clock.now());
        tracing::info!(
            match.id = %state.id(),
            owner.id = %owner.id,
            theme = %state.settings().theme().name,
            teams = ?state.settings().teams(),
            "New match created"
        );
        if let Some(ledger) = &self.ledger {
            ledger.track(&state);
        }
        self.state = Some(state);
        self.persist().await;
        self.broadcast_full_state();
        self.snapshot().ok_or(MatchError::NoMatch)
    }

    async fn leave_match(&mut self) -> Result<(), MatchError> {
        let state = self.state.take().ok_or(MatchError::NoMatch)?;
        self.cancel_round_tasks();

        let ended_at = match state.phase() {
            RoundPhase::GameOver(over) => over.ended_at,
            _ => self.clock.now(),
        };
        if let Some(ledger) = &self.ledger {
            ledger.close(state.id(), ended_at);
        }
        if let Err(e) = self.store.clear_match().await {
            tracing::warn!(error = %e, "Failed to clear persisted match");
        }
        self.store_dirty = false;
        tracing::info!(match.id = %state.id(), finished = state.is_over(), "Left match");
        let _ = self.events.send(MatchEvent::MatchCleared);
        Ok(())
    }

    /// Finishes a transition: persists, reacts to effects, and answers with
    /// the resulting snapshot. Errors leave state untouched.
    async fn commit(
        &mut self,
        result: Result<Vec<MatchEffect>, MatchError>,
    ) -> Result<MatchSnapshot, MatchError> {
        let effects = result?;
        self.after_transition(effects).await;
        self.snapshot().ok_or(MatchError::NoMatch)
    }

    async fn after_transition(&mut self, effects: Vec<MatchEffect>) {
        self.persist().await;

        let mut ledger_dirty = false;
        let mut closed_at = None;
        for effect in &effects {
            match effect {
                MatchEffect::RoundStarted { started_at, .. } => {
                    self.cancel_auto_start();
                    if let Some(state) = self.state.as_ref() {
                        let seconds = state.settings().round_seconds();
                        self.ticker = Some(self.spawn_ticker(*started_at, seconds));
                    }
                }
                MatchEffect::AwaitingConfirmation { .. } | MatchEffect::EmptyRound { .. } => {
                    self.ticker = None;
                }
                MatchEffect::ScheduleAutoStart {
                    team_index,
                    round_number,
                } => self.schedule_auto_start(*team_index, *round_number),
                MatchEffect::ScoreChanged { .. } | MatchEffect::TurnAdvanced { .. } => {
                    ledger_dirty = true;
                }
                MatchEffect::GameOver { .. } => {
                    self.cancel_round_tasks();
                    ledger_dirty = true;
                    closed_at = self.state.as_ref().and_then(|s| match s.phase() {
                        RoundPhase::GameOver(over) => Some(over.ended_at),
                        _ => None,
                    });
                }
                MatchEffect::WordServed { .. } => {}
            }
            if let Some(event) = MatchEvent::from_effect(effect) {
                let _ = self.events.send(event);
            }
        }

        if let (Some(ledger), Some(state)) = (&self.ledger, self.state.as_ref()) {
            if ledger_dirty {
                ledger.update(state);
            }
            if let Some(ended_at) = closed_at {
                ledger.close(state.id(), ended_at);
            }
        }
        self.broadcast_full_state();
    }

    async fn persist(&mut self) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        match self.store.save_match(state).await {
            Ok(()) => {
                if self.store_dirty {
                    tracing::info!(match.id = %state.id(), "Match state persisted after earlier failure");
                }
                self.store_dirty = false;
            }
            Err(e) => {
                tracing::warn!(match.id = %state.id(), error = %e, "Failed to persist match state, will retry");
                self.store_dirty = true;
            }
        }
    }

    fn spawn_ticker(&self, started_at: chrono::DateTime<chrono::Utc>, seconds: u64) -> RoundTicker {
        RoundTicker::spawn(
            started_at,
            seconds,
            self.config.tick_interval,
            Arc::clone(&self.clock),
            self.ticker_tx.clone(),
        )
    }

    fn schedule_auto_start(&mut self, team_index: usize, round_number: u32) {
        self.cancel_auto_start();
        let sender = self.self_sender.clone();
        let delay = self.config.auto_start_delay;
        self.auto_start = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender
                    .send(MatchActorMessage::AutoStartRound {
                        team_index,
                        round_number,
                    })
                    .await;
            }
        }));
    }

    fn cancel_auto_start(&mut self) {
        if let Some(handle) = self.auto_start.take() {
            handle.abort();
        }
    }

    fn cancel_round_tasks(&mut self) {
        self.cancel_auto_start();
        self.ticker = None;
    }

    fn snapshot(&self) -> Option<MatchSnapshot> {
        self.state.as_ref().map(|state| MatchSnapshot {
            remaining_seconds: state.remaining_seconds(self.clock.now()),
            state: state.clone(),
        })
    }

    fn broadcast_full_state(&self) {
        if let Some(state) = self.state.as_ref() {
            let _ = self
                .events
                .send(MatchEvent::FullStateUpdate(Box::new(state.clone())));
        }
    }
}

pub async fn run_match_actor(mut actor: MatchActor) {
    tracing::info!("Match actor started");
    actor.resume().await;

    loop {
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => actor.handle_message(msg).await,
                    None => {
                        tracing::info!("Match actor channel closed. Shutting down");
                        break;
                    }
                }
            }
            Some(event) = actor.ticker_rx.recv() => {
                actor.handle_ticker_event(event).await;
            }
        }
    }

    actor.cancel_round_tasks();
    if actor.store_dirty {
        actor.persist().await;
    }
    tracing::info!("Match actor stopping");
}

#[derive(Clone, Debug)]
pub struct MatchActorHandle {
    sender: mpsc::Sender<MatchActorMessage>,
    events: broadcast::Sender<MatchEvent>,
}

impl MatchActorHandle {
    pub fn spawn(deps: SessionDeps, buffer_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let actor = MatchActor::new(receiver, sender.downgrade(), events.clone(), deps);
        tokio::spawn(run_match_actor(actor));
        Self { sender, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    pub async fn new_match(
        &self,
        owner: Principal,
        settings: MatchSettings,
    ) -> Result<MatchSnapshot, MatchError> {
        self.request(|respond_to| MatchActorMessage::NewMatch {
            owner,
            settings: Box::new(settings),
            respond_to,
        })
        .await
    }

    pub async fn start_round(&self) -> Result<MatchSnapshot, MatchError> {
        self.request(|respond_to| MatchActorMessage::StartRound { respond_to })
            .await
    }

    pub async fn decide(&self, guessed: bool) -> Result<MatchSnapshot, MatchError> {
        self.request(|respond_to| MatchActorMessage::Decide {
            guessed,
            respond_to,
        })
        .await
    }

    pub async fn confirm_round(&self, log: Vec<WordOutcome>) -> Result<MatchSnapshot, MatchError> {
        self.request(|respond_to| MatchActorMessage::ConfirmRound { log, respond_to })
            .await
    }

    pub async fn leave_match(&self) -> Result<(), MatchError> {
        self.request(|respond_to| MatchActorMessage::LeaveMatch { respond_to })
            .await
    }

    pub async fn snapshot(&self) -> Option<MatchSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(MatchActorMessage::GetSnapshot { respond_to: tx })
            .await
            .is_err()
        {
            tracing::error!("Failed to send GetSnapshot");
            return None;
        }
        rx.await.ok().flatten()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> MatchActorMessage,
    ) -> Result<T, MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| MatchError::SessionClosed)?;
        rx.await.map_err(|_| MatchError::SessionClosed)?
    }
}
