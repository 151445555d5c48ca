//! Plain-text rendering of [`WorkflowState`].

use std::fmt;

use weather_core::{CandidateLocation, Phase, WeatherSnapshot, WorkflowState};

/// Whole screen: weather (or loading/error) plus the search results when open.
pub struct StateView<'a>(pub &'a WorkflowState);

pub struct SnapshotView<'a>(pub &'a WeatherSnapshot);

pub struct CandidatesView<'a>(pub &'a [CandidateLocation]);

impl fmt::Display for StateView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0;

        match &state.phase {
            Phase::Cold => writeln!(f, "No city loaded yet.")?,
            Phase::Loading { .. } => writeln!(f, "Loading weather...")?,
            Phase::Ready(snapshot) => write!(f, "{}", SnapshotView(snapshot))?,
            Phase::Failed { error, last_good } => {
                writeln!(f, "Error: {error}")?;
                if let Some(snapshot) = last_good {
                    write!(f, "Showing last known weather:\n\n{}", SnapshotView(snapshot))?;
                }
            }
        }

        if state.search_visible {
            write!(f, "\n{}", CandidatesView(&state.candidates))?;
            if let Some(err) = &state.lookup_error {
                writeln!(f, "Search failed: {err}")?;
            }
        }

        Ok(())
    }
}

impl fmt::Display for SnapshotView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.0;
        let current = &snapshot.current;

        writeln!(f, "{}", snapshot.location_label())?;
        writeln!(f, "{}\u{b0}  {}", format_temp(current.temp_c), current.condition.text)?;
        writeln!(
            f,
            "Wind {}km  Humidity {}%  Sunrise {}",
            format_temp(current.wind_kph),
            current.humidity,
            snapshot.todays_sunrise().unwrap_or("-"),
        )?;

        writeln!(f, "\nDaily forecast")?;
        for day in &snapshot.forecast {
            writeln!(
                f,
                "  {:<10} {:>6}\u{b0}  {}",
                day.weekday_name(),
                format_temp(day.day.avg_temp_c),
                day.day.condition.text,
            )?;
        }

        Ok(())
    }
}

impl fmt::Display for CandidatesView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No matching cities.");
        }

        for candidate in self.0 {
            writeln!(f, "  {}", candidate.label())?;
        }
        Ok(())
    }
}

fn format_temp(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 { format!("{rounded:.0}") } else { format!("{rounded:.1}") }
}
