//! Family Dashboard CLI - weather, shared calendars, and task lists
//!
//! Fetches data for a wall-mounted family dashboard and prints the requested
//! view as JSON. Results are cached on disk so a flaky connection degrades
//! the data rather than the dashboard.

use clap::Parser;

use famdash::app::App;
use famdash::cli::{cache_from_cli, Cli, Command};
use famdash::config::Config;
use famdash::sources::Served;

/// Serializes a served view, noting on stderr when it came from stale cache.
fn render<T, E>(served: Served<T, E>, source: &str) -> Result<String, serde_json::Error>
where
    T: serde::Serialize,
    E: std::fmt::Display,
{
    if let Some(err) = &served.degraded {
        eprintln!("warning: serving cached {source} data: {err}");
    }
    serde_json::to_string_pretty(&served.data)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let cache = cache_from_cli(&cli)?;
    let app = App::from_config(&config, cache);

    let output = match cli.command {
        Command::Weather => render(app.weather_view().await?, "weather")?,
        Command::Calendar => render(app.calendar_view().await?, "calendar")?,
        Command::Tasks => render(app.tasks_view().await?, "tasks")?,
        Command::Status => serde_json::to_string_pretty(&app.status_view())?,
        Command::All => serde_json::to_string_pretty(&app.dashboard_view().await)?,
    };
    println!("{output}");

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
