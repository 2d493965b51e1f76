//! Keyboard steering with change detection

use crate::game::Direction;
use macroquad::prelude::*;

/// Turns key state into steering commands, emitting only on change.
pub struct InputManager {
    current: Direction,
    prev_escape: bool,
}

/// What the window loop should do after sampling input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Steer(Direction),
    Quit,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            current: Direction::Still,
            prev_escape: false,
        }
    }

    /// Samples the keyboard; returns an action when something changed.
    pub fn update(&mut self) -> Option<InputAction> {
        let escape = is_key_down(KeyCode::Escape);
        let quit = escape && !self.prev_escape;
        self.prev_escape = escape;
        if quit {
            return Some(InputAction::Quit);
        }

        let pressed = Self::sample();
        self.apply(pressed).map(InputAction::Steer)
    }

    fn sample() -> Option<Direction> {
        if is_key_pressed(KeyCode::Up) || is_key_pressed(KeyCode::W) {
            Some(Direction::Up)
        } else if is_key_pressed(KeyCode::Down) || is_key_pressed(KeyCode::S) {
            Some(Direction::Down)
        } else if is_key_pressed(KeyCode::Left) || is_key_pressed(KeyCode::A) {
            Some(Direction::Left)
        } else if is_key_pressed(KeyCode::Right) || is_key_pressed(KeyCode::D) {
            Some(Direction::Right)
        } else {
            None
        }
    }

    fn apply(&mut self, pressed: Option<Direction>) -> Option<Direction> {
        match pressed {
            Some(direction) if direction != self.current => {
                self.current = direction;
                Some(direction)
            }
            _ => None,
        }
    }

    pub fn current(&self) -> Direction {
        self.current
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_manager_creation() {
        let input_manager = InputManager::new();
        assert_eq!(input_manager.current(), Direction::Still);
    }

    #[test]
    fn test_only_changes_are_emitted() {
        let mut input_manager = InputManager::new();
        assert_eq!(input_manager.apply(Some(Direction::Up)), Some(Direction::Up));
        assert_eq!(input_manager.apply(Some(Direction::Up)), None);
        assert_eq!(input_manager.apply(None), None);
        assert_eq!(input_manager.apply(Some(Direction::Left)), Some(Direction::Left));
        assert_eq!(input_manager.current(), Direction::Left);
    }
}
