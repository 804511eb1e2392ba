//! Colored CLI display utilities for monitor output.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::monitor::{MonitorEvent, MonitorStatus};
use crate::parser::{CombatEvent, CombatEventKind};
use crate::session::{SessionUpdate, SessionUpdateKind};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate to at most `max_chars` characters, adding an ellipsis if cut.
#[must_use]
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_chars - 3).collect();
    format!("{kept}...")
}

/// One-line summary of a combat event.
#[must_use]
pub fn describe_event(event: &CombatEvent) -> String {
    let source = event.source.as_deref().unwrap_or("?");
    let target = event.target.as_deref().unwrap_or("?");
    let amount = event.amount.map(|a| a.to_string()).unwrap_or_default();

    match event.kind {
        CombatEventKind::DamageDealt | CombatEventKind::DamageReceived => format!(
            "{source} -> {target} {amount} {}",
            event.damage_type.as_deref().unwrap_or("damage")
        ),
        CombatEventKind::HealingDone | CombatEventKind::HealingReceived => {
            format!("{source} heals {target} {amount}")
        }
        CombatEventKind::Death => format!("{target} died"),
        CombatEventKind::CrowdControl => format!(
            "{target} {}",
            event.ability.as_deref().unwrap_or("controlled")
        ),
        CombatEventKind::SpellCast => format!(
            "{source} casts {}",
            event.ability.as_deref().unwrap_or("a spell")
        ),
    }
}

/// Print a combat event.
pub fn print_combat_event(event: &CombatEvent) {
    let tag = format!("[{}]", event.kind.category().to_uppercase());
    let text = describe_event(event);
    let time = event.timestamp.format("%H:%M:%S").to_string();
    match event.kind {
        CombatEventKind::DamageDealt => println!("{} {} {}", time.dimmed(), tag.red().bold(), text),
        CombatEventKind::DamageReceived => {
            println!("{} {} {}", time.dimmed(), tag.yellow().bold(), text);
        }
        CombatEventKind::HealingDone | CombatEventKind::HealingReceived => {
            println!("{} {} {}", time.dimmed(), tag.green().bold(), text);
        }
        CombatEventKind::Death => println!("{} {} {}", time.dimmed(), tag.magenta().bold(), text),
        CombatEventKind::CrowdControl | CombatEventKind::SpellCast => {
            println!("{} {} {}", time.dimmed(), tag.cyan().bold(), text);
        }
    }
    let _ = io::stdout().flush();
}

/// Print a session transition. Updates are not printed.
pub fn print_session(update: &SessionUpdate) {
    let session = &update.session;
    let id = truncate(&session.id, 8);
    match update.kind {
        SessionUpdateKind::Start => println!(
            "{} {} started {}",
            timestamp().dimmed(),
            "[SESSION]".blue().bold(),
            id.dimmed()
        ),
        SessionUpdateKind::End => {
            let damage: u64 = session
                .participant_map
                .values()
                .map(|p| p.damage_dealt)
                .sum();
            println!(
                "{} {} ended {} events={} duration={}s damage={}",
                timestamp().dimmed(),
                "[SESSION]".blue().bold(),
                id.dimmed(),
                session.event_count(),
                session.duration_ms() / 1000,
                damage
            );
        }
        SessionUpdateKind::Update => return,
    }
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}

/// Print a monitor notification. Raw lines are shown only in raw mode.
pub fn print_monitor_event(event: &MonitorEvent, raw_mode: bool) {
    match event {
        MonitorEvent::Line(line) if raw_mode => {
            println!("{} {}", format!("{:>6}", line.line_number).dimmed(), line.content);
        }
        MonitorEvent::Line(_) => return,
        MonitorEvent::Event(combat) => print_combat_event(combat),
        MonitorEvent::Session(update) => print_session(update),
        MonitorEvent::FileRotate(change) => println!(
            "{} {} {} ({} -> {} bytes)",
            timestamp().dimmed(),
            "[ROTATE]".yellow().bold(),
            change.filename.display(),
            change.previous_size.unwrap_or(0),
            change.current_size
        ),
        MonitorEvent::FileChange(_) => return,
        MonitorEvent::Error { message, .. } | MonitorEvent::MonitorError { message } => {
            print_error(message);
        }
        other => println!(
            "{} {}",
            timestamp().dimmed(),
            format!("[{}]", other.event_type().to_uppercase()).cyan().bold()
        ),
    }
    let _ = io::stdout().flush();
}

/// Print the final status summary.
pub fn print_status(status: &MonitorStatus) {
    let stats = &status.stats;
    println!(
        "{} state={} lines={} events={} sessions={} rotations={} webhooks={}/{}",
        "[STATUS]".blue().bold(),
        status.state,
        stats.lines_processed,
        stats.events_emitted,
        stats.sessions_completed,
        stats.rotations,
        stats.webhooks_delivered,
        stats.webhooks_delivered + stats.webhooks_failed
    );
    println!(
        "{} offset={} line={}",
        "[POSITION]".blue().bold(),
        status.position.byte_offset,
        status.position.line_number
    );
    let _ = io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: CombatEventKind) -> CombatEvent {
        CombatEvent {
            timestamp: Utc::now(),
            kind,
            source: Some("You".to_string()),
            target: Some("goblin".to_string()),
            amount: Some(25),
            damage_type: Some("slash".to_string()),
            ability: None,
            line_number: 1,
            raw: String::new(),
        }
    }

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate("hello world", 8), "hello...");
        assert_eq!(truncate("hello", 2), "...");
    }

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_describe_damage() {
        assert_eq!(
            describe_event(&event(CombatEventKind::DamageDealt)),
            "You -> goblin 25 slash"
        );
    }

    #[test]
    fn test_describe_death_and_cc() {
        assert_eq!(describe_event(&event(CombatEventKind::Death)), "goblin died");
        let mut cc = event(CombatEventKind::CrowdControl);
        cc.ability = Some("stunned".to_string());
        assert_eq!(describe_event(&cc), "goblin stunned");
    }
}
