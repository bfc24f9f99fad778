//! Human-readable rendering of structured alerts

use std::fmt::Write as _;

use crate::models::{Alert, AlertKind, Direction, MoveBand};

/// Format a decimal fraction as a percentage with two decimals (`0.0525` -> `5.25%`)
pub fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

/// Render an alert as chat text
pub fn message(alert: &Alert) -> String {
    match &alert.kind {
        AlertKind::AnchorSet { name, value } => {
            format!(":smirk_cat: {name} anchor set: {}", percent(*value))
        }
        AlertKind::RateMoved {
            name,
            band,
            direction,
            anchor,
            current,
        } => {
            let (emoji, label) = match band {
                MoveBand::Major => (":scream_cat:", "10%"),
                MoveBand::Minor => (":smirk_cat:", "1%"),
                MoveBand::Fine => (":smirk_cat:", "0.5%"),
            };
            let arrow = match direction {
                Direction::Up => "⬆️",
                Direction::Down => "⬇️",
            };
            format!(
                "{emoji} {arrow} {name} moved ≥ {label}\nAnchor: {}\nCurrent: {}",
                percent(*anchor),
                percent(*current)
            )
        }
        AlertKind::CapReached { name } => {
            format!("🧢 {name} has reached its cap\nUsage: 100%")
        }
        AlertKind::CapReleased { name, usage } => {
            format!("🚨 {name} is no longer at its cap\nUsage: {}", percent(*usage))
        }
        AlertKind::EventScheduled {
            title,
            starts_at,
            summary,
            fundraising_goals,
            link,
        } => {
            let mut text = format!(":heart_eyes_cat: {title} ICO scheduled");
            if let Some(starts_at) = starts_at {
                let _ = write!(text, " for {}", starts_at.format("%b %d, %Y (%H:%M UTC)"));
            }
            if let Some(summary) = summary {
                let _ = write!(text, "\n\n{summary}");
            }
            if let Some(goals) = fundraising_goals {
                let _ = write!(text, "\n{goals}");
            }
            if let Some(link) = link {
                let _ = write!(text, "\nLink: {link}");
            }
            text
        }
        AlertKind::EventLaunchesToday { title } => {
            format!(":smile_cat: {title} ICO launches today!")
        }
    }
}
