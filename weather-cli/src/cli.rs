use std::{fmt, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode, Select, Text};
use weather_core::{
    CandidateLocation, Config, FileStore, Workflow, provider_from_config,
    workflow::MIN_QUERY_CHARS,
};

use crate::render::{CandidatesView, StateView};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure the WeatherAPI.com key and the default city.
    Configure,

    /// Show weather for the last chosen city (or the default one).
    Show,

    /// List cities matching a partial name.
    Search {
        /// At least three characters of a city name.
        query: String,
    },

    /// Search, pick a city and browse its forecast.
    Interactive,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure()?,
            Command::Show => {
                let workflow = build_workflow()?;
                workflow.initialize()?.await?;
                print!("{}", StateView(&workflow.state()));
            }
            Command::Search { query } => {
                let workflow = build_workflow()?;
                workflow.toggle_search();

                let Some(pending) = workflow.submit_query(query) else {
                    anyhow::bail!("Search needs at least {MIN_QUERY_CHARS} characters.");
                };
                pending.await?;

                let state = workflow.state();
                if let Some(err) = state.lookup_error {
                    return Err(err.into());
                }
                print!("{}", CandidatesView(&state.candidates));
            }
            Command::Interactive => interactive().await?,
        }

        Ok(())
    }
}

fn build_workflow() -> anyhow::Result<Workflow> {
    let config = Config::load()?;
    let provider = provider_from_config(&config)?;
    let store = FileStore::open_default().context("Failed to locate state directory")?;
    tracing::debug!(state_file = %store.path().display(), "using state file");

    Ok(Workflow::new(Arc::from(provider), Arc::new(store), config.workflow_options()))
}

fn configure() -> anyhow::Result<()> {
    let mut config = Config::load()?;

    let api_key = Password::new("WeatherAPI.com API key:")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;
    let city = Text::new("Default city:").with_default(&config.default_city).prompt()?;

    config.set_api_key(api_key);
    config.default_city = city.trim().to_string();
    config.validate()?;
    config.save()?;

    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Search,
    Retry,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Search => "Search city",
            Action::Retry => "Retry",
            Action::Quit => "Quit",
        })
    }
}

/// Select list entry for a candidate city.
struct Choice(CandidateLocation);

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.region.is_empty() {
            f.write_str(&self.0.label())
        } else {
            write!(f, "{} ({})", self.0.label(), self.0.region)
        }
    }
}

async fn interactive() -> anyhow::Result<()> {
    let workflow = build_workflow()?;
    println!("Loading weather...");
    workflow.initialize()?.await?;

    loop {
        let state = workflow.state();
        println!("\n{}", StateView(&state));

        let mut actions = vec![Action::Search];
        if state.phase.error().is_some() {
            actions.push(Action::Retry);
        }
        actions.push(Action::Quit);

        match Select::new("What next?", actions).prompt()? {
            Action::Search => search_and_select(&workflow).await?,
            Action::Retry => {
                if let Some(pending) = workflow.retry() {
                    println!("Loading weather...");
                    pending.await?;
                }
            }
            Action::Quit => break,
        }
    }

    Ok(())
}

async fn search_and_select(workflow: &Workflow) -> anyhow::Result<()> {
    if !workflow.state().search_visible {
        workflow.toggle_search();
    }

    let text = Text::new("Search city:").prompt()?;
    let Some(pending) = workflow.submit_query(text) else {
        println!("Type at least {MIN_QUERY_CHARS} characters.");
        workflow.toggle_search();
        return Ok(());
    };
    pending.await?;

    let state = workflow.state();
    if let Some(err) = &state.lookup_error {
        println!("Search failed: {err}");
    }
    if state.candidates.is_empty() {
        println!("No matching cities.");
        workflow.toggle_search();
        return Ok(());
    }

    let choices: Vec<Choice> = state.candidates.into_iter().map(Choice).collect();
    match Select::new("Pick a city", choices).prompt_skippable()? {
        Some(Choice(candidate)) => {
            let pending = workflow.select_location(&candidate);
            println!("Loading weather...");
            pending.await?;
        }
        None => {
            workflow.toggle_search();
        }
    }

    Ok(())
}
