use crate::error::ClientError;
use crate::game::Direction;
use shared::{Grid, PlayerId, Position, CELL_SIZE, HOST_SPAWN, JOIN_SPAWN, TICK_MILLIS};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Runtime settings for one peer.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub player_id: PlayerId,
    /// Peers to send offers to at startup. Empty means we host and wait.
    pub join: Vec<PlayerId>,
    pub relay: String,
    pub bind_ip: IpAddr,
    pub grid: Grid,
    pub cell_size: f32,
    pub tick: Duration,
    pub heading: Direction,
}

impl ClientConfig {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            join: Vec::new(),
            relay: "127.0.0.1:9000".to_string(),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            grid: Grid::default(),
            cell_size: CELL_SIZE,
            tick: Duration::from_millis(TICK_MILLIS),
            heading: Direction::Still,
        }
    }

    pub fn is_host(&self) -> bool {
        self.join.is_empty()
    }

    pub fn spawn(&self) -> Position {
        if self.is_host() {
            HOST_SPAWN
        } else {
            JOIN_SPAWN
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.player_id.trim().is_empty() {
            return Err(ClientError::Config("player name is empty".to_string()));
        }
        if self.join.iter().any(|peer| *peer == self.player_id) {
            return Err(ClientError::Config("cannot join yourself".to_string()));
        }
        if self.grid.width <= 0 || self.grid.height <= 0 {
            return Err(ClientError::Config(format!(
                "grid {}x{} has no cells",
                self.grid.width, self.grid.height
            )));
        }
        if !self.grid.contains(self.spawn()) {
            return Err(ClientError::Config(
                "grid too small for the spawn point".to_string(),
            ));
        }
        if self.tick.is_zero() {
            return Err(ClientError::Config("tick period must be positive".to_string()));
        }
        Ok(())
    }
}
