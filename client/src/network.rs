//! The peer's event loop.
//!
//! [`GameSession`] is the single owner of the local game, the player map and
//! the connection map. Everything else reaches it as an [`Event`]: transport
//! callbacks, signaling messages, timer ticks and keyboard steering.

use crate::config::ClientConfig;
use crate::direct::DirectTransport;
use crate::error::{ClientError, SessionError};
use crate::game::{Direction, LocalGame, TickOutcome};
use crate::reconciler::PlayerMap;
use crate::rendering::{compose, Frame, View};
use crate::session::PeerSessionManager;
use crate::signaling::{InboundSignal, RelaySignaling, SignalingTransport};
use crate::transport::{PeerTransport, SessionEvent};
use log::{debug, error, info, warn};
use shared::{PlayerId, SignalMessage};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Session(SessionEvent),
    Signal {
        from: PlayerId,
        message: SignalMessage,
    },
    TickFired,
    Steer(Direction),
}

pub struct GameSession<T: PeerTransport, S: SignalingTransport> {
    local_id: PlayerId,
    cell_size: f32,
    game: LocalGame,
    players: PlayerMap,
    sessions: PeerSessionManager<T, S>,
    frames: watch::Sender<Frame>,
}

impl<T: PeerTransport, S: SignalingTransport> GameSession<T, S> {
    pub fn new(
        game: LocalGame,
        sessions: PeerSessionManager<T, S>,
        cell_size: f32,
        frames: watch::Sender<Frame>,
    ) -> Self {
        let local_id = sessions.local_id().clone();
        let mut players = PlayerMap::new();
        players.set_local(&local_id, game.player_state());

        let session = Self {
            local_id,
            cell_size,
            game,
            players,
            sessions,
            frames,
        };
        session.publish_frame();
        session
    }

    /// Adds `peer` to the player map and starts negotiating with it.
    pub fn join(&mut self, peer: &PlayerId) -> Result<(), SessionError> {
        if self.players.ensure(peer) {
            self.log_players();
        }
        self.sessions.connect(peer)?;
        info!("Sent join offer to {}", peer);
        Ok(())
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Session(event) => self.on_session_event(event),
            Event::Signal { from, message } => {
                debug!("Signal {} from {}", message.kind(), from);
                if let Err(e) = self.sessions.on_signaling_message(&from, message) {
                    warn!("Negotiation with {} failed: {}", from, e);
                }
            }
            Event::TickFired => self.tick(),
            Event::Steer(direction) => self.game.steer(direction),
        }

        if self.players.take_redraw() {
            self.publish_frame();
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let opened = match &event {
            SessionEvent::ChannelOpened { peer, .. } => Some(peer.clone()),
            _ => None,
        };

        if let Some((from, data)) = self.sessions.handle_event(event) {
            // Malformed payloads are logged and counted by the map.
            let _ = self.players.reconcile(&from, &data);
        }

        if let Some(peer) = opened {
            if self.sessions.open_peers().contains(&peer) && self.players.ensure(&peer) {
                self.log_players();
            }
        }
    }

    fn tick(&mut self) {
        match self.game.tick() {
            TickOutcome::Halted => {}
            TickOutcome::GameOver(reason) => {
                error!("Game Over! Snake {} with score {}", reason, self.game.score());
                self.players
                    .set_local(&self.local_id, self.game.player_state());
            }
            TickOutcome::Moved | TickOutcome::Ate => {
                self.players
                    .set_local(&self.local_id, self.game.player_state());
                self.sessions.broadcast(&self.game.payload());
            }
        }
    }

    fn publish_frame(&self) {
        let view = View {
            local_id: &self.local_id,
            grid: self.game.grid(),
            cell_size: self.cell_size,
            food: self.game.food(),
            score: self.game.score(),
            game_over: self.game.game_over().map(|reason| reason.to_string()),
        };
        self.frames.send_replace(compose(&self.players, &view));
    }

    fn log_players(&self) {
        info!("Players: {}", self.players.ids().join(", "));
    }

    pub fn players(&self) -> &PlayerMap {
        &self.players
    }

    pub fn game(&self) -> &LocalGame {
        &self.game
    }

    pub fn sessions(&self) -> &PeerSessionManager<T, S> {
        &self.sessions
    }

    /// Runs until steering input closes or Ctrl+C, then tears every session down.
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut signals: mpsc::UnboundedReceiver<InboundSignal>,
        mut steering: mpsc::UnboundedReceiver<Direction>,
        tick: Duration,
    ) -> Result<(), ClientError> {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick completes immediately.
        ticker.tick().await;

        info!("Running as {} ({} ms ticks)", self.local_id, tick.as_millis());

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    self.handle_event(Event::Session(event));
                },

                Some((from, message)) = signals.recv() => {
                    self.handle_event(Event::Signal { from, message });
                },

                _ = ticker.tick(), if self.game.is_running() => {
                    self.handle_event(Event::TickFired);
                },

                steer = steering.recv() => match steer {
                    Some(direction) => self.handle_event(Event::Steer(direction)),
                    None => {
                        info!("Input closed, leaving the game");
                        break;
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, leaving the game");
                    break;
                }
            }
        }

        let stats = self.sessions.stats();
        info!(
            "Sent {} payloads, dropped {} on closed channels, discarded {} malformed",
            stats.sent,
            stats.dropped_not_open + stats.dropped_unknown_peer,
            self.players.discarded()
        );
        self.sessions.close_all();
        Ok(())
    }
}

/// Wires the relay signaling and direct transport together and plays until the user leaves.
pub async fn run_peer(
    config: ClientConfig,
    frames: watch::Sender<Frame>,
    steering: mpsc::UnboundedReceiver<Direction>,
) -> Result<(), ClientError> {
    config.validate()?;

    let (session_tx, session_rx) = mpsc::unbounded_channel();
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();

    let signaling = RelaySignaling::connect(&config.player_id, &config.relay, signal_tx).await?;
    let transport = DirectTransport::new(&config.player_id, config.bind_ip, session_tx);
    let sessions = PeerSessionManager::new(&config.player_id, transport, signaling);

    let mut game = LocalGame::new(config.grid, config.spawn());
    game.steer(config.heading);

    let mut session = GameSession::new(game, sessions, config.cell_size, frames);
    if config.is_host() {
        info!("Hosting; waiting for offers");
    }
    for peer in &config.join {
        if let Err(e) = session.join(peer) {
            warn!("Could not start session with {}: {}", peer, e);
        }
    }

    session
        .run(session_rx, signal_rx, steering, config.tick)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::CellKind;
    use crate::session::mock::{self, MockSignaling, MockTransport};
    use crate::session::ChannelState;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{GameStatePayload, Grid, PlayerState, Position, CELL_SIZE};

    type TestSession = GameSession<MockTransport, MockSignaling>;

    fn id(name: &str) -> PlayerId {
        name.to_string()
    }

    fn session(
        local: &str,
        body: Vec<Position>,
    ) -> (TestSession, MockTransport, MockSignaling, watch::Receiver<Frame>) {
        let (manager, transport, signaling) = mock::manager(local);
        let game = LocalGame::with_rng(Grid::default(), body[0], StdRng::seed_from_u64(1))
            .with_snake(body)
            .with_food(Position::new(15, 15));
        let (frames_tx, frames_rx) = watch::channel(Frame::default());
        (
            GameSession::new(game, manager, CELL_SIZE, frames_tx),
            transport,
            signaling,
            frames_rx,
        )
    }

    fn open(session: &mut TestSession, peer: &str) {
        session.join(&id(peer)).unwrap();
        let event = mock::opened(session.sessions(), peer);
        session.handle_event(Event::Session(event));
    }

    #[test]
    fn test_local_player_present_from_start() {
        let (session, _, _, frames) = session("alice", vec![Position::new(10, 10)]);
        assert_eq!(
            session.players().get(&id("alice")),
            Some(&PlayerState::spawn(Position::new(10, 10)))
        );
        assert_eq!(frames.borrow().count(CellKind::LocalSnake), 1);
    }

    #[test]
    fn test_join_adds_optimistic_entry() {
        let (mut session, _, signaling, _) = session("bob", vec![Position::new(5, 5)]);
        session.join(&id("alice")).unwrap();

        assert_eq!(
            session.players().get(&id("alice")),
            Some(&PlayerState::default())
        );
        assert_eq!(signaling.sent.borrow()[0].1.kind(), "offer");
    }

    #[test]
    fn test_tick_broadcasts_local_state() {
        let (mut session, transport, _, _) = session("alice", vec![Position::new(10, 10)]);
        open(&mut session, "bob");
        session.handle_event(Event::Steer(Direction::Right));

        session.handle_event(Event::TickFired);

        let wire = transport.wire.borrow();
        assert_eq!(wire.writes.len(), 1);
        let sent = GameStatePayload::decode(&wire.writes[0].1).unwrap();
        assert_eq!(sent.snake, vec![Position::new(11, 10)]);
        assert_eq!(sent.food, Position::new(15, 15));
        assert_eq!(
            session.players().get(&id("alice")).unwrap().snake,
            vec![Position::new(11, 10)]
        );
    }

    #[test]
    fn test_tick_skips_unopened_peers() {
        let (mut session, transport, _, _) = session("alice", vec![Position::new(10, 10)]);
        session.join(&id("bob")).unwrap();

        session.handle_event(Event::TickFired);

        assert!(transport.wire.borrow().writes.is_empty());
        assert_eq!(session.sessions().stats().dropped_not_open, 1);
    }

    #[test]
    fn test_game_over_stops_broadcasts() {
        let (mut session, transport, _, frames) = session("alice", vec![Position::new(19, 3)]);
        open(&mut session, "bob");
        session.handle_event(Event::Steer(Direction::Right));

        session.handle_event(Event::TickFired);
        session.handle_event(Event::TickFired);
        session.handle_event(Event::TickFired);

        assert!(!session.game().is_running());
        assert!(transport.wire.borrow().writes.is_empty());
        assert_eq!(
            frames.borrow().game_over.as_deref(),
            Some("left the grid at (20, 3)")
        );
    }

    #[test]
    fn test_remote_payload_reconciled_and_rendered() {
        let (mut session, _, _, frames) = session("bob", vec![Position::new(10, 10)]);
        open(&mut session, "alice");

        let raw = br#"{"snake":[{"x":3,"y":3},{"x":2,"y":3}],"score":1,"food":{"x":5,"y":5},"mushrooms":[]}"#;
        let event = mock::received(session.sessions(), "alice", raw);
        session.handle_event(Event::Session(event));

        let expected = PlayerState {
            snake: vec![Position::new(3, 3), Position::new(2, 3)],
            score: 1,
        };
        assert_eq!(session.players().get(&id("alice")), Some(&expected));

        let frame = frames.borrow();
        assert_eq!(frame.count(CellKind::RemoteSnake), 2);
        // Remote food is not drawn; only ours.
        assert_eq!(frame.count(CellKind::Food), 1);
        assert!(frame
            .cells
            .iter()
            .any(|cell| cell.kind == CellKind::Food && cell.x == 15.0 * CELL_SIZE));
    }

    #[test]
    fn test_malformed_remote_payload_ignored() {
        let (mut session, _, _, _) = session("bob", vec![Position::new(10, 10)]);
        open(&mut session, "alice");
        let good = br#"{"snake":[{"x":3,"y":3}],"score":1,"food":{"x":5,"y":5},"mushrooms":[]}"#;
        let event = mock::received(session.sessions(), "alice", good);
        session.handle_event(Event::Session(event));

        let event = mock::received(session.sessions(), "alice", b"{\"snake\": oops");
        session.handle_event(Event::Session(event));

        assert_eq!(
            session.players().get(&id("alice")).unwrap().snake,
            vec![Position::new(3, 3)]
        );
        assert_eq!(session.players().discarded(), 1);
    }

    #[test]
    fn test_answerer_adds_player_on_open() {
        let (mut session, _, signaling, _) = session("bob", vec![Position::new(10, 10)]);
        session.handle_event(Event::Signal {
            from: id("alice"),
            message: mock::offer(),
        });
        assert!(!session.players().contains(&id("alice")));

        let event = mock::opened(session.sessions(), "alice");
        session.handle_event(Event::Session(event));

        assert!(session.players().contains(&id("alice")));
        assert_eq!(
            session.sessions().channel_state(&id("alice")),
            Some(ChannelState::Open)
        );
        assert_eq!(signaling.sent.borrow()[0].1.kind(), "answer");
    }

    #[tokio::test]
    async fn test_run_loop_processes_events_until_input_closes() {
        let (mut session, _, signaling, frames) = session("bob", vec![Position::new(10, 10)]);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (steer_tx, steer_rx) = mpsc::unbounded_channel();

        signals_tx.send((id("alice"), mock::offer())).unwrap();
        steer_tx.send(Direction::Down).unwrap();

        // The open event only makes sense once the offer has been answered.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            events_tx
                .send(SessionEvent::ChannelOpened {
                    peer: id("alice"),
                    serial: 1,
                })
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(steer_tx);
            drop(events_tx);
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            session.run(events_rx, signals_rx, steer_rx, Duration::from_millis(20)),
        )
        .await
        .expect("run loop did not stop")
        .unwrap();

        assert_eq!(signaling.sent.borrow()[0].1.kind(), "answer");
        assert!(session.players().contains(&id("alice")));
        assert!(session.sessions().is_empty());
        assert!(frames.borrow().players.contains(&id("bob")));
        drop(signals_tx);
    }
}
