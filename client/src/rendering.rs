//! Frame composition and macroquad drawing.

use crate::reconciler::PlayerMap;
use macroquad::prelude::*;
use shared::{Grid, PlayerId, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    LocalSnake,
    RemoteSnake,
    Food,
}

/// One filled square on the canvas, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub kind: CellKind,
}

/// Everything needed to draw one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub width: f32,
    pub height: f32,
    pub cells: Vec<Cell>,
    pub score: u32,
    pub players: Vec<PlayerId>,
    pub game_over: Option<String>,
}

impl Frame {
    pub fn count(&self, kind: CellKind) -> usize {
        self.cells.iter().filter(|cell| cell.kind == kind).count()
    }
}

/// Input for [`compose`] that is not part of the player map.
#[derive(Debug, Clone)]
pub struct View<'a> {
    pub local_id: &'a PlayerId,
    pub grid: Grid,
    pub cell_size: f32,
    pub food: Position,
    pub score: u32,
    pub game_over: Option<String>,
}

/// Builds a frame from state; no drawing happens here.
pub fn compose(players: &PlayerMap, view: &View<'_>) -> Frame {
    let size = view.cell_size - 2.0;
    let cell = |position: &Position, kind| {
        let (x, y) = position.to_pixels(view.cell_size);
        Cell { x, y, size, kind }
    };

    let ids = players.ids();
    let mut cells = Vec::new();
    for id in &ids {
        let Some(player) = players.get(id) else {
            continue;
        };
        let kind = if id == view.local_id {
            CellKind::LocalSnake
        } else {
            CellKind::RemoteSnake
        };
        cells.extend(player.snake.iter().map(|segment| cell(segment, kind)));
    }
    cells.push(cell(&view.food, CellKind::Food));

    Frame {
        width: view.grid.width as f32 * view.cell_size,
        height: view.grid.height as f32 * view.cell_size,
        cells,
        score: view.score,
        players: ids,
        game_over: view.game_over.clone(),
    }
}

const SIDEBAR_WIDTH: f32 = 160.0;

pub struct Renderer {
    width: f32,
    height: f32,
}

impl Renderer {
    pub fn new(grid: Grid, cell_size: f32) -> Self {
        Renderer {
            width: grid.width as f32 * cell_size,
            height: grid.height as f32 * cell_size,
        }
    }

    pub fn window_size(&self) -> (i32, i32) {
        ((self.width + SIDEBAR_WIDTH) as i32, self.height as i32)
    }

    pub fn render(&mut self, frame: &Frame) {
        clear_background(Color::from_rgba(26, 26, 26, 255));
        draw_rectangle(0.0, 0.0, self.width, self.height, BLACK);

        for cell in &frame.cells {
            let color = match cell.kind {
                CellKind::LocalSnake => LIME,
                CellKind::RemoteSnake => BLUE,
                CellKind::Food => RED,
            };
            draw_rectangle(cell.x, cell.y, cell.size, cell.size, color);
        }

        self.draw_sidebar(frame);

        if let Some(reason) = &frame.game_over {
            self.draw_game_over(reason);
        }
    }

    fn draw_sidebar(&mut self, frame: &Frame) {
        let x = self.width + 10.0;
        let mut y = 24.0;

        draw_text(&format!("Score: {}", frame.score), x, y, 22.0, WHITE);
        y += 30.0;
        draw_text("Players", x, y, 18.0, GRAY);
        for player in &frame.players {
            y += 20.0;
            draw_text(player, x, y, 18.0, WHITE);
        }
    }

    fn draw_game_over(&mut self, reason: &str) {
        draw_rectangle(
            0.0,
            0.0,
            self.width,
            self.height,
            Color::from_rgba(0, 0, 0, 180),
        );
        let title = "Game Over!";
        let dims = measure_text(title, None, 40, 1.0);
        draw_text(
            title,
            (self.width - dims.width) / 2.0,
            self.height / 2.0,
            40.0,
            WHITE,
        );
        let dims = measure_text(reason, None, 18, 1.0);
        draw_text(
            reason,
            (self.width - dims.width) / 2.0,
            self.height / 2.0 + 30.0,
            18.0,
            GRAY,
        );
    }
}
