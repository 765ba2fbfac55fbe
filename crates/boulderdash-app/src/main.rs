use anyhow::{bail, Context, Result};
use boulderdash_core::{Action, GameParameters, GameState};
use clap::{Parser, ValueEnum};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "boulderdash", version, about = "Boulder Dash simulation shell")]
struct AppCli {
    /// File of level strings, one per line (see `--line`).
    #[arg(long, conflicts_with = "board")]
    level: Option<PathBuf>,

    /// Inline level string.
    #[arg(long)]
    board: Option<String>,

    /// Zero-based line to pick from the level file.
    #[arg(long, default_value_t = 0)]
    line: usize,

    /// JSON file overriding default game parameters.
    #[arg(long)]
    params: Option<PathBuf>,

    /// What to do with the loaded level.
    #[arg(long, value_enum, default_value = "play")]
    mode: Mode,

    /// Number of ticks for rollout mode.
    #[arg(long, default_value_t = 10_000)]
    steps: usize,

    /// Seed for random rollout actions; cycles through all actions if unset.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    /// Interactive WASD play on stdin.
    Play,
    /// Scripted rollout reporting throughput and the final hash.
    Rollout,
    /// Parse the level and dump the board.
    Show,
}

fn main() -> Result<()> {
    let cli = AppCli::parse();
    init_tracing();

    let params = load_params(&cli)?;
    let state = load_state(&cli, &params)?;
    info!(
        rows = state.rows(),
        cols = state.cols(),
        gems_required = state.gems_required(),
        mode = ?cli.mode,
        "Loaded level"
    );

    match cli.mode {
        Mode::Play => run_play(state),
        Mode::Rollout => run_rollout(state, cli.steps, cli.seed),
        Mode::Show => run_show(&state, &params),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn load_params(cli: &AppCli) -> Result<GameParameters> {
    let Some(path) = &cli.params else {
        return Ok(GameParameters::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read parameter file {}", path.display()))?;
    let params: GameParameters = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse parameter file {}", path.display()))?;
    Ok(params)
}

fn load_state(cli: &AppCli, params: &GameParameters) -> Result<GameState> {
    let level = if let Some(board) = &cli.board {
        board.clone()
    } else if let Some(path) = &cli.level {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read level file {}", path.display()))?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .nth(cli.line)
            .with_context(|| format!("level file has no line {}", cli.line))?
            .to_string()
    } else {
        bail!("either --board or --level is required");
    };

    GameState::new(&level, params).context("failed to parse level string")
}

fn run_play(mut state: GameState) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    print_turn(&mut stdout, &state)?;
    writeln!(stdout, "Move with w/a/s/d, quit with q.")?;

    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        for key in line.trim().chars() {
            let action = match key {
                'w' => Action::Up,
                'd' => Action::Right,
                's' => Action::Down,
                'a' => Action::Left,
                'q' => return Ok(()),
                other => {
                    warn!(key = %other, "Ignoring unmapped key");
                    continue;
                }
            };
            state.apply_action(action);
            print_turn(&mut stdout, &state)?;
            if state.is_terminal() {
                let outcome = if state.is_solution() { "solved" } else { "dead" };
                writeln!(stdout, "Terminal: {outcome}")?;
                return Ok(());
            }
        }
    }
    Ok(())
}

fn print_turn(out: &mut impl Write, state: &GameState) -> Result<()> {
    writeln!(out, "{state}")?;
    writeln!(
        out,
        "hash={:#018x} gems={}/{} reward={:#x}",
        state.hash(),
        state.gems_collected(),
        state.gems_required(),
        state.reward_signal()
    )?;
    Ok(())
}

fn run_rollout(mut state: GameState, steps: usize, seed: Option<u64>) -> Result<()> {
    let mut rng = seed.map(SmallRng::seed_from_u64);
    let started = Instant::now();

    for step in 0..steps {
        let action = match &mut rng {
            Some(rng) => Action::ALL[rng.random_range(0..Action::ALL.len())],
            None => Action::ALL[step % Action::ALL.len()],
        };
        state.apply_action(action);
    }

    let elapsed = started.elapsed();
    let per_second = steps as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        steps,
        elapsed_ms = elapsed.as_millis() as u64,
        per_second = per_second as u64,
        "Rollout finished"
    );
    println!(
        "{steps} steps in {:.3}s ({per_second:.0} steps/s)",
        elapsed.as_secs_f64()
    );
    println!("final hash: {:#018x}", state.hash());
    println!(
        "agent alive: {}, in exit: {}, gems: {}/{}",
        state.agent_alive(),
        state.agent_in_exit(),
        state.gems_collected(),
        state.gems_required()
    );
    Ok(())
}

fn run_show(state: &GameState, params: &GameParameters) -> Result<()> {
    println!("{params}");
    println!("{state}");
    let (channels, rows, cols) = state.observation_shape();
    println!("observation shape: ({channels}, {rows}, {cols})");
    println!("hash: {:#018x}", state.hash());
    Ok(())
}
