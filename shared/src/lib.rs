use serde::{Deserialize, Serialize};

pub mod signaling;

pub use signaling::{IceCandidate, SdpKind, SessionDescription, SignalMessage};

pub const GRID_WIDTH: i32 = 20;
pub const GRID_HEIGHT: i32 = 20;
pub const CELL_SIZE: f32 = 20.0;
pub const TICK_MILLIS: u64 = 100;
pub const HOST_SPAWN: Position = Position { x: 10, y: 10 };
pub const JOIN_SPAWN: Position = Position { x: 5, y: 5 };
pub const INITIAL_FOOD: Position = Position { x: 15, y: 15 };
pub const PROTOCOL_VERSION: u32 = 1;

/// Label of the single data channel opened per peer connection.
pub const GAME_CHANNEL: &str = "gameState";

/// Player identity, chosen client-side and unique among active participants.
pub type PlayerId = String;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Top-left pixel of this cell on the canvas.
    pub fn to_pixels(&self, cell_size: f32) -> (f32, f32) {
        (self.x as f32 * cell_size, self.y as f32 * cell_size)
    }
}

/// Grid dimensions in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub width: i32,
    pub height: i32,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn contains(&self, position: Position) -> bool {
        position.x >= 0 && position.x < self.width && position.y >= 0 && position.y < self.height
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(GRID_WIDTH, GRID_HEIGHT)
    }
}

/// Snake body and score of one player. The body is ordered head first.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PlayerState {
    pub snake: Vec<Position>,
    pub score: u32,
}

impl PlayerState {
    pub fn spawn(at: Position) -> Self {
        Self {
            snake: vec![at],
            score: 0,
        }
    }

    pub fn head(&self) -> Option<Position> {
        self.snake.first().copied()
    }
}

/// The record broadcast to every peer on each tick.
///
/// `mushrooms` is carried for compatibility with existing clients. It is never
/// populated or read, but whatever a peer sends in it survives a decode/encode.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GameStatePayload {
    pub snake: Vec<Position>,
    pub score: u32,
    pub food: Position,
    #[serde(default)]
    pub mushrooms: Vec<serde_json::Value>,
}

impl GameStatePayload {
    pub fn new(player: &PlayerState, food: Position) -> Self {
        Self {
            snake: player.snake.clone(),
            score: player.score,
            food,
            mushrooms: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// The player half of the payload; food stays local to each peer.
    pub fn into_player_state(self) -> PlayerState {
        PlayerState {
            snake: self.snake,
            score: self.score,
        }
    }
}

/// Datagrams exchanged with the signaling relay.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Register {
        player_id: PlayerId,
        client_version: u32,
    },
    Heartbeat,
    /// `payload` is an encoded [`SignalMessage`]; the relay never looks inside.
    Forward {
        from: PlayerId,
        to: PlayerId,
        payload: String,
    },
    Unregister,

    Registered {
        player_id: PlayerId,
    },
    Rejected {
        reason: String,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_offset() {
        let position = Position::new(3, 3);
        assert_eq!(position.offset(1, 0), Position::new(4, 3));
        assert_eq!(position.offset(0, -1), Position::new(3, 2));
    }

    #[test]
    fn test_position_pixels() {
        let (px, py) = Position::new(4, 7).to_pixels(CELL_SIZE);
        assert_eq!(px, 80.0);
        assert_eq!(py, 140.0);
    }

    #[test]
    fn test_grid_bounds() {
        let grid = Grid::default();
        assert!(grid.contains(Position::new(0, 0)));
        assert!(grid.contains(Position::new(19, 19)));
        assert!(!grid.contains(Position::new(-1, 5)));
        assert!(!grid.contains(Position::new(20, 5)));
        assert!(!grid.contains(Position::new(5, 20)));
    }

    #[test]
    fn test_player_spawn() {
        let player = PlayerState::spawn(HOST_SPAWN);
        assert_eq!(player.snake, vec![Position::new(10, 10)]);
        assert_eq!(player.score, 0);
        assert_eq!(player.head(), Some(HOST_SPAWN));
    }

    #[test]
    fn test_payload_wire_shape() {
        let player = PlayerState {
            snake: vec![Position::new(3, 3), Position::new(2, 3)],
            score: 1,
        };
        let payload = GameStatePayload::new(&player, Position::new(5, 5));

        let value: serde_json::Value = serde_json::from_slice(&payload.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "snake": [{"x": 3, "y": 3}, {"x": 2, "y": 3}],
                "score": 1,
                "food": {"x": 5, "y": 5},
                "mushrooms": []
            })
        );
    }

    #[test]
    fn test_payload_preserves_mushrooms() {
        let raw = br#"{"snake":[],"score":0,"food":{"x":1,"y":1},"mushrooms":[{"x":2,"y":2}]}"#;
        let payload = GameStatePayload::decode(raw).unwrap();
        assert_eq!(payload.mushrooms, vec![json!({"x": 2, "y": 2})]);

        let again = GameStatePayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(again, payload);
    }

    #[test]
    fn test_payload_without_mushrooms_field() {
        let raw = br#"{"snake":[{"x":1,"y":2}],"score":4,"food":{"x":0,"y":0}}"#;
        let payload = GameStatePayload::decode(raw).unwrap();
        assert!(payload.mushrooms.is_empty());
        assert_eq!(payload.score, 4);
    }

    #[test]
    fn test_payload_rejects_schema_mismatch() {
        assert!(GameStatePayload::decode(b"not json").is_err());
        assert!(GameStatePayload::decode(br#"{"snake":[],"food":{"x":0,"y":0}}"#).is_err());
        assert!(GameStatePayload::decode(br#"{"snake":"x","score":1,"food":{"x":0,"y":0}}"#).is_err());
        assert!(
            GameStatePayload::decode(br#"{"snake":[],"score":-3,"food":{"x":0,"y":0}}"#).is_err()
        );
    }

    #[test]
    fn test_payload_into_player_state() {
        let player = PlayerState {
            snake: vec![Position::new(1, 1)],
            score: 9,
        };
        let payload = GameStatePayload::new(&player, Position::new(0, 0));
        assert_eq!(payload.into_player_state(), player);
    }

    #[test]
    fn test_packet_serialization_forward() {
        let packet = Packet::Forward {
            from: "alice".to_string(),
            to: "bob".to_string(),
            payload: r#"{"type":"offer","sdp":"v=0"}"#.to_string(),
        };
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_packet_serialization_register() {
        let packet = Packet::Register {
            player_id: "alice".to_string(),
            client_version: PROTOCOL_VERSION,
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Register {
                player_id,
                client_version,
            } => {
                assert_eq!(player_id, "alice");
                assert_eq!(client_version, PROTOCOL_VERSION);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_rejects_garbage() {
        assert!(Packet::decode(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
    }
}
