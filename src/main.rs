use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    style::Print,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, error, info};
use rand::Rng;
use ratatui::{prelude::*, widgets::*};
use simplelog::{Config, LevelFilter, WriteLogger};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Cell size shared by the snake, the food and the movement step.
const GRID_UNIT: u16 = 30;
/// Board side length; positions live in `[0, BOARD_EXTENT - GRID_UNIT]`.
const BOARD_EXTENT: u16 = 600;
const BOARD_CELLS: u16 = BOARD_EXTENT / GRID_UNIT;
const INITIAL_POSITION: Pos = Pos { x: 300, y: 300 };
const SCORE_INCREMENT: u32 = 10;
const BASE_SPEED_MS: u64 = 300;
const RECORD_FILE: &str = ".gridsnek_record.txt";

fn main() -> Result<(), io::Error> {
    // Set up logging before anything else
    WriteLogger::init(
        LevelFilter::Info,
        Config::default(),
        File::create("gridsnek.log")?,
    )
    .expect("Failed to initialize logger");

    info!("Starting gridsnek");

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Create app state
    let mut game = Game::new();

    // Run game loop. The interval is re-read every pass so that speed
    // changes earned mid-run take effect on the very next tick.
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|f| game.render(f))?;

        let tick_rate = game.tick_rate();
        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                game.handle_input(key);
            }
        }

        if last_tick.elapsed() >= tick_rate {
            game.update();
            last_tick = Instant::now();
        }

        if let GameState::Exit = game.state {
            break;
        }
    }

    // Cleanup terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pos {
    x: u16,
    y: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PosDelta {
    x: i32,
    y: i32,
}

impl From<Direction> for PosDelta {
    fn from(dir: Direction) -> Self {
        let step = i32::from(GRID_UNIT);
        match dir {
            Direction::Up => PosDelta { x: 0, y: -step },
            Direction::Down => PosDelta { x: 0, y: step },
            Direction::Left => PosDelta { x: -step, y: 0 },
            Direction::Right => PosDelta { x: step, y: 0 },
        }
    }
}

impl Pos {
    fn offset(&self, delta: PosDelta) -> (i32, i32) {
        (i32::from(self.x) + delta.x, i32::from(self.y) + delta.y)
    }

    /// Folds an unwrapped coordinate pair back onto the board (torus
    /// topology: stepping past either edge re-enters on the far side).
    fn wrapped(x: i32, y: i32) -> Pos {
        let extent = i32::from(BOARD_EXTENT);
        Pos {
            x: x.rem_euclid(extent) as u16,
            y: y.rem_euclid(extent) as u16,
        }
    }

    fn matches(&self, x: i32, y: i32) -> bool {
        i32::from(self.x) == x && i32::from(self.y) == y
    }
}

/// Body cells run tail-first; the head is stored separately, so the
/// logical sequence is `[tail .. neck, head]`.
#[derive(Debug)]
struct Snake {
    head: Pos,
    body: VecDeque<Pos>,
}

impl Snake {
    fn new(start: Pos) -> Self {
        Snake {
            head: start,
            body: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        self.body.len() + 1
    }

    fn contains(&self, pos: Pos) -> bool {
        self.head == pos || self.body.contains(&pos)
    }

    /// Whether the head overlaps the body, ignoring the neck (the cell
    /// immediately behind the head).
    fn hit_self(&self) -> bool {
        let n = self.body.len();
        if n < 2 {
            return false;
        }
        self.body.iter().take(n - 1).any(|pos| *pos == self.head)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Food {
    pos: Pos,
    color: Color,
}

#[derive(Debug, PartialEq, Eq)]
enum TickOutcome {
    Idle,      // No direction commanded yet, nothing moved
    Moved,     // Normal movement
    Ate,       // Ate the food, grew by one cell
    Collision, // Hit itself, run over
}

/// One run's worth of game state, advanced exactly once per tick.
#[derive(Debug)]
struct Engine {
    snake: Snake,
    food: Food,
    direction: Option<Direction>,
    score: u32,
    level: u32,
    speed: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Engine {
            snake: Snake::new(INITIAL_POSITION),
            food: Food {
                pos: Pos { x: 0, y: 0 },
                color: Color::White,
            },
            direction: None,
            score: 0,
            level: 1,
            speed: BASE_SPEED_MS,
        }
    }
}

impl Engine {
    fn new(rng: &mut impl Rng) -> Self {
        let mut engine = Engine::default();
        engine.food = engine.new_food(rng);
        engine
    }

    /// Commanded directions take effect on the next tick; a reversal
    /// would walk the snake straight into its own neck, so it is
    /// ignored.
    fn steer(&mut self, new_direction: Direction) {
        if self.direction != Some(new_direction.opposite()) {
            self.direction = Some(new_direction);
        }
    }

    fn advance(&mut self, rng: &mut impl Rng) -> TickOutcome {
        let Some(direction) = self.direction else {
            return TickOutcome::Idle;
        };

        // The eat check runs on the unwrapped coordinates: a head that
        // stepped off the board this tick cannot match the food until
        // it has re-entered and moved again.
        let (raw_x, raw_y) = self.snake.head.offset(direction.into());
        let ate = self.food.pos.matches(raw_x, raw_y);

        let old_head = self.snake.head;
        self.snake.head = Pos::wrapped(raw_x, raw_y);
        self.snake.body.push_back(old_head);

        if ate {
            self.score += SCORE_INCREMENT;
            self.apply_level_curve();
            self.food = self.new_food(rng);
        } else {
            self.snake.body.pop_front();
        }

        if self.snake.hit_self() {
            return TickOutcome::Collision;
        }

        if ate {
            TickOutcome::Ate
        } else {
            TickOutcome::Moved
        }
    }

    /// Recomputes speed and level from the current score. Applied only
    /// on eat events. The rules run in order and each one sees the
    /// speed left by the previous: the 250-point discount below 170
    /// can undershoot the floor, and the last rule pulls it back up to
    /// 120.
    fn apply_level_curve(&mut self) {
        if self.score % 100 == 0 && (170..=300).contains(&self.speed) {
            self.speed -= 40;
            self.level += 1;
        }
        if self.speed <= 170 && self.score % 250 == 0 {
            self.speed -= 10;
        }
        if self.speed > 120 && self.speed <= 150 {
            self.speed = 120;
            self.level += 1;
        }
        if self.speed <= 120 && self.score % 250 == 0 {
            self.speed = 120;
            self.level += 1;
        }
    }

    /// Draws a fresh food cell off the snake. Resamples on overlap, so
    /// termination is only probabilistic; fine while the board stays
    /// sparse.
    fn new_food(&self, rng: &mut impl Rng) -> Food {
        loop {
            let pos = Pos {
                x: rng.gen_range(0..BOARD_CELLS) * GRID_UNIT,
                y: rng.gen_range(0..BOARD_CELLS) * GRID_UNIT,
            };
            if !self.snake.contains(pos) {
                return Food {
                    pos,
                    color: Color::Rgb(rng.gen(), rng.gen(), rng.gen()),
                };
            }
        }
    }
}

#[derive(Debug)]
enum GameState {
    Menu,
    Running(Engine),
    Over { engine: Engine, final_score: u32 },
    Exit,
}

struct Game {
    state: GameState,
    record: u32,
    record_file: PathBuf,
}

impl Game {
    fn new() -> Self {
        let record_file = PathBuf::from(RECORD_FILE);
        Game {
            record: load_record(&record_file),
            state: GameState::Menu,
            record_file,
        }
    }

    fn new_run() -> GameState {
        info!("Starting a new run");
        GameState::Running(Engine::new(&mut rand::thread_rng()))
    }

    fn tick_rate(&self) -> Duration {
        match &self.state {
            GameState::Running(engine) => Duration::from_millis(engine.speed),
            _ => Duration::from_millis(BASE_SPEED_MS),
        }
    }

    fn update_record(&mut self, score: u32) {
        if score > self.record {
            self.record = score;
            if let Err(e) = fs::write(&self.record_file, self.record.to_string()) {
                error!("Error saving record: {}", e);
            }
        }
    }

    fn render(&self, frame: &mut Frame) {
        let header = match &self.state {
            GameState::Running(engine) | GameState::Over { engine, .. } => {
                format!(
                    "GRIDSNEK    Record: {}    Score: {}    Level: {}",
                    self.record,
                    engine.score,
                    level_display(engine.level)
                )
            }
            _ => {
                format!("GRIDSNEK    Record: {}", self.record)
            }
        };

        let size = frame.area();
        let layout = Layout::default()
            .direction(layout::Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Title + record
                Constraint::Min(0),    // Board area
            ])
            .split(size);

        frame.render_widget(
            Paragraph::new(header)
                .alignment(Alignment::Left)
                .block(Block::default().borders(Borders::ALL)),
            layout[0],
        );

        match &self.state {
            GameState::Menu => {
                frame.render_widget(
                    Paragraph::new("Press SPACE to play\nSteer with WASD or the arrow keys")
                        .alignment(Alignment::Center)
                        .block(Block::default().borders(Borders::ALL)),
                    layout[1],
                );
            }
            GameState::Running(engine) => {
                let block = Block::default().borders(Borders::ALL);
                let inner_area = block.inner(layout[1]);

                frame.render_widget(block, layout[1]);
                frame.render_widget(engine, centered(inner_area, BOARD_CELLS, BOARD_CELLS));
            }
            GameState::Over {
                engine,
                final_score,
            } => {
                let block = Block::default().borders(Borders::ALL);
                let inner_area = block.inner(layout[1]);

                frame.render_widget(block, layout[1]);
                frame.render_widget(engine, centered(inner_area, BOARD_CELLS, BOARD_CELLS));
                frame.render_widget(
                    Paragraph::new(format!(
                        "GAME OVER\nFinal Score: {}\nPress SPACE to play again",
                        final_score
                    ))
                    .alignment(Alignment::Center),
                    centered(inner_area, inner_area.width, 3),
                );
            }
            GameState::Exit => {}
        }
    }

    fn handle_input(&mut self, key: event::KeyEvent) {
        use event::KeyCode;

        let new_state = match &mut self.state {
            GameState::Menu => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => Some(GameState::Exit),
                KeyCode::Char(' ') | KeyCode::Enter => Some(Self::new_run()),
                _ => None,
            },
            GameState::Running(engine) => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => Some(GameState::Exit),
                KeyCode::Up | KeyCode::Char('w') => {
                    engine.steer(Direction::Up);
                    None
                }
                KeyCode::Down | KeyCode::Char('s') => {
                    engine.steer(Direction::Down);
                    None
                }
                KeyCode::Left | KeyCode::Char('a') => {
                    engine.steer(Direction::Left);
                    None
                }
                KeyCode::Right | KeyCode::Char('d') => {
                    engine.steer(Direction::Right);
                    None
                }
                _ => None,
            },
            GameState::Over { .. } => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => Some(GameState::Exit),
                KeyCode::Char(' ') | KeyCode::Enter => Some(Self::new_run()),
                _ => None,
            },
            GameState::Exit => None,
        };

        if let Some(new_state) = new_state {
            self.state = new_state;
        }
    }

    fn update(&mut self) {
        if let GameState::Running(engine) = &mut self.state {
            match engine.advance(&mut rand::thread_rng()) {
                TickOutcome::Collision => {
                    let final_score = engine.score;
                    let engine = std::mem::take(engine);
                    info!(
                        "Run over with score {}, length {}",
                        final_score,
                        engine.snake.len()
                    );
                    self.update_record(final_score);
                    self.state = GameState::Over {
                        engine,
                        final_score,
                    };
                }
                TickOutcome::Ate => {
                    debug!("Ate food, score now {}", engine.score);
                    chirp();
                }
                TickOutcome::Moved | TickOutcome::Idle => {}
            }
        }
    }
}

fn load_record(path: &Path) -> u32 {
    match fs::read_to_string(path).map(|s| s.trim().parse().unwrap_or(0)) {
        Ok(score) => score,
        Err(e) => {
            error!("Error loading record: {}", e);
            0
        }
    }
}

/// Terminal bell as the eat cue; best effort, failures are ignored.
fn chirp() {
    let _ = execute!(io::stdout(), Print('\u{7}'));
}

fn level_display(level: u32) -> String {
    format!("{:02}", level)
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

impl Widget for &Engine {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // One terminal cell per grid cell
        let cell = |pos: Pos| {
            let x = area.x + pos.x / GRID_UNIT;
            let y = area.y + pos.y / GRID_UNIT;
            (x < area.right() && y < area.bottom()).then_some((x, y))
        };

        for y in area.top()..area.bottom() {
            for x in area.left()..area.right() {
                buf[(x, y)].set_symbol("·").set_fg(Color::DarkGray);
            }
        }

        for pos in &self.snake.body {
            if let Some(xy) = cell(*pos) {
                buf[xy].set_symbol(" ").set_bg(Color::Gray);
            }
        }

        if let Some(xy) = cell(self.snake.head) {
            buf[xy].set_symbol(" ").set_bg(Color::White);
        }

        if let Some(xy) = cell(self.food.pos) {
            buf[xy].set_symbol("●").set_fg(self.food.color);
        }
    }
}
