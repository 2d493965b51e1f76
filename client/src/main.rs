use clap::Parser;
use client::config::ClientConfig;
use client::game::Direction;
use client::input::{InputAction, InputManager};
use client::network::run_peer;
use client::profile::load_player_name;
use client::rendering::{Frame, Renderer};
use log::{error, info};
use macroquad::window::{next_frame, Conf};
use macroquad::Window;
use shared::{Grid, GRID_HEIGHT, GRID_WIDTH, TICK_MILLIS};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Player name; the stored profile name wins if there is one
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Peer to join; repeat to join several. Omit to host
    #[arg(short = 'j', long = "join")]
    join: Vec<String>,

    /// Signaling relay address
    #[arg(short = 'r', long, default_value = "127.0.0.1:9000")]
    relay: String,

    /// Simulation tick period in milliseconds
    #[arg(long, default_value_t = TICK_MILLIS)]
    tick_ms: u64,

    #[arg(long, default_value_t = GRID_WIDTH)]
    grid_width: i32,

    #[arg(long, default_value_t = GRID_HEIGHT)]
    grid_height: i32,

    /// Where the player name is kept between runs
    #[arg(short = 'p', long, default_value = "snake-profile.json")]
    profile: PathBuf,

    /// Run without a window
    #[arg(long)]
    headless: bool,

    /// Starting direction (still, up, down, left, right)
    #[arg(long, default_value = "still")]
    heading: Direction,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let name = load_player_name(&args.profile, args.name.as_deref())?;
    let mut config = ClientConfig::new(name);
    config.join = args.join;
    config.relay = args.relay;
    config.grid = Grid::new(args.grid_width, args.grid_height);
    config.tick = Duration::from_millis(args.tick_ms);
    config.heading = args.heading;
    config.validate()?;

    info!("Starting peer {}...", config.player_id);
    info!("Signaling relay: {}", config.relay);
    if config.is_host() {
        info!("No peers to join; hosting");
    } else {
        info!("Joining: {}", config.join.join(", "));
    }

    let (frames_tx, frames_rx) = watch::channel(Frame::default());
    let (steer_tx, steer_rx) = mpsc::unbounded_channel();

    if args.headless {
        let runtime = tokio::runtime::Runtime::new()?;
        // Held until the loop ends; dropping it would end the game.
        let _steer_tx = steer_tx;
        runtime.block_on(run_peer(config, frames_tx, steer_rx))?;
        return Ok(());
    }

    info!("Controls: arrow keys or WASD to steer, Escape to quit");

    let renderer = Renderer::new(config.grid, config.cell_size);
    let (width, height) = renderer.window_size();
    let title = format!("Snake - {}", config.player_id);

    let network = thread::spawn(move || -> Result<(), String> {
        let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
        runtime
            .block_on(run_peer(config, frames_tx, steer_rx))
            .map_err(|e| e.to_string())
    });

    let conf = Conf {
        window_title: title,
        window_width: width,
        window_height: height,
        window_resizable: false,
        ..Default::default()
    };
    Window::from_config(conf, draw_loop(renderer, frames_rx, steer_tx));

    match network.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Peer stopped: {}", e);
            Err(e.into())
        }
        Err(_) => Err("network thread panicked".into()),
    }
}

async fn draw_loop(
    mut renderer: Renderer,
    frames: watch::Receiver<Frame>,
    steer: mpsc::UnboundedSender<Direction>,
) {
    let mut input = InputManager::new();

    loop {
        match input.update() {
            Some(InputAction::Quit) => break,
            Some(InputAction::Steer(direction)) => {
                if steer.send(direction).is_err() {
                    break;
                }
            }
            None => {}
        }

        let frame = frames.borrow().clone();
        renderer.render(&frame);

        next_frame().await;
    }

    info!("Window closed");
}
