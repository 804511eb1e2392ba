//! Typed combat events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a combat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombatEventKind {
    #[serde(rename = "damage:dealt")]
    DamageDealt,
    #[serde(rename = "damage:received")]
    DamageReceived,
    #[serde(rename = "healing:done")]
    HealingDone,
    #[serde(rename = "healing:received")]
    HealingReceived,
    #[serde(rename = "death")]
    Death,
    #[serde(rename = "cc")]
    CrowdControl,
    #[serde(rename = "spell")]
    SpellCast,
}

impl CombatEventKind {
    /// Category suffix used in `event:<category>` notification names.
    #[must_use]
    pub fn category(self) -> &'static str {
        match self {
            Self::DamageDealt => "damage:dealt",
            Self::DamageReceived => "damage:received",
            Self::HealingDone => "healing:done",
            Self::HealingReceived => "healing:received",
            Self::Death => "death",
            Self::CrowdControl => "cc",
            Self::SpellCast => "spell",
        }
    }

    #[must_use]
    pub fn is_damage(self) -> bool {
        matches!(self, Self::DamageDealt | Self::DamageReceived)
    }

    #[must_use]
    pub fn is_healing(self) -> bool {
        matches!(self, Self::HealingDone | Self::HealingReceived)
    }
}

/// One combat event translated from a log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: CombatEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage_type: Option<String>,
    /// Spell, ability or effect name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ability: Option<String>,
    /// Line the event was read from.
    pub line_number: u64,
    pub raw: String,
}

impl CombatEvent {
    /// Notification name, e.g. `event:damage:dealt`.
    #[must_use]
    pub fn event_type(&self) -> String {
        format!("event:{}", self.kind.category())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_as_category() {
        for kind in [
            CombatEventKind::DamageDealt,
            CombatEventKind::DamageReceived,
            CombatEventKind::HealingDone,
            CombatEventKind::HealingReceived,
            CombatEventKind::Death,
            CombatEventKind::CrowdControl,
            CombatEventKind::SpellCast,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.category()));
        }
    }

    #[test]
    fn test_event_type_prefix() {
        let event = CombatEvent {
            timestamp: Utc::now(),
            kind: CombatEventKind::Death,
            source: None,
            target: Some("a goblin".to_string()),
            amount: None,
            damage_type: None,
            ability: None,
            line_number: 3,
            raw: "[10:00:00] a goblin dies!".to_string(),
        };
        assert_eq!(event.event_type(), "event:death");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "death");
        assert_eq!(json["lineNumber"], 3);
        assert!(json.get("amount").is_none());
    }
}
