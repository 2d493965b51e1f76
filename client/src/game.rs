//! Local snake simulation, advanced once per tick.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{GameStatePayload, Grid, PlayerState, Position, INITIAL_FOOD};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Movement vector applied to the head on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Still,
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Still => (0, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "still" => Ok(Direction::Still),
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOverReason {
    OutOfBounds(Position),
    SelfCollision(Position),
}

impl fmt::Display for GameOverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameOverReason::OutOfBounds(p) => write!(f, "left the grid at ({}, {})", p.x, p.y),
            GameOverReason::SelfCollision(p) => write!(f, "ran into itself at ({}, {})", p.x, p.y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Moved,
    Ate,
    GameOver(GameOverReason),
    /// The game already ended; nothing changed.
    Halted,
}

pub struct LocalGame {
    grid: Grid,
    snake: VecDeque<Position>,
    direction: Direction,
    food: Position,
    score: u32,
    over: Option<GameOverReason>,
    rng: StdRng,
}

impl LocalGame {
    pub fn new(grid: Grid, spawn: Position) -> Self {
        Self::with_rng(grid, spawn, StdRng::from_entropy())
    }

    pub fn with_rng(grid: Grid, spawn: Position, rng: StdRng) -> Self {
        Self {
            grid,
            snake: VecDeque::from(vec![spawn]),
            direction: Direction::Still,
            food: INITIAL_FOOD,
            score: 0,
            over: None,
            rng,
        }
    }

    /// Replaces the body; used to set up specific layouts.
    pub fn with_snake(mut self, body: Vec<Position>) -> Self {
        self.snake = body.into();
        self
    }

    pub fn with_food(mut self, food: Position) -> Self {
        self.food = food;
        self
    }

    pub fn steer(&mut self, direction: Direction) {
        if self.direction != direction {
            debug!("Steering {:?} -> {:?}", self.direction, direction);
        }
        self.direction = direction;
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.over.is_some() {
            return TickOutcome::Halted;
        }

        let Some(&head) = self.snake.front() else {
            return TickOutcome::Halted;
        };
        let (dx, dy) = self.direction.delta();
        let new_head = head.offset(dx, dy);
        self.snake.push_front(new_head);

        let ate = new_head == self.food;
        if ate {
            self.score += 1;
            self.place_food();
        } else {
            self.snake.pop_back();
        }

        let reason = if !self.grid.contains(new_head) {
            Some(GameOverReason::OutOfBounds(new_head))
        } else if self.snake.iter().skip(1).any(|segment| *segment == new_head) {
            Some(GameOverReason::SelfCollision(new_head))
        } else {
            None
        };

        match reason {
            Some(reason) => {
                warn!("Game over: {}", reason);
                self.over = Some(reason);
                TickOutcome::GameOver(reason)
            }
            None if ate => {
                info!("Ate food, score is now {}", self.score);
                TickOutcome::Ate
            }
            None => TickOutcome::Moved,
        }
    }

    fn place_food(&mut self) {
        self.food = Position::new(
            self.rng.gen_range(0..self.grid.width),
            self.rng.gen_range(0..self.grid.height),
        );
        debug!("Food placed at ({}, {})", self.food.x, self.food.y);
    }

    pub fn is_running(&self) -> bool {
        self.over.is_none()
    }

    pub fn game_over(&self) -> Option<GameOverReason> {
        self.over
    }

    pub fn food(&self) -> Position {
        self.food
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn snake(&self) -> impl Iterator<Item = &Position> {
        self.snake.iter()
    }

    pub fn len(&self) -> usize {
        self.snake.len()
    }

    pub fn player_state(&self) -> PlayerState {
        PlayerState {
            snake: self.snake.iter().copied().collect(),
            score: self.score,
        }
    }

    pub fn payload(&self) -> GameStatePayload {
        GameStatePayload::new(&self.player_state(), self.food)
    }
}
