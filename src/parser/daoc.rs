//! Translator for Dark Age of Camelot chat and combat logs.
//!
//! Lines look like `[01:23:45] You hit the goblin for 25 points of slash damage!`.
//! Only the time of day is logged, so timestamps are anchored to a log date.
//! The date is taken from the `*** Chat Log Opened:` header when one is seen
//! and advances by a day when the clock wraps past midnight.

use std::sync::{Mutex, PoisonError};

use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use regex::{Captures, Regex};

use super::{CombatEvent, CombatEventKind, LineTranslator, TranslateError};
use crate::watcher::TailLine;

const TIMESTAMP_PREFIX: &str = r"^\[(?P<ts>\d{2}:\d{2}:\d{2})\]\s+";
const LOG_OPENED: &str = r"^\*\*\* Chat Log Opened: (?P<opened>.+?)\s*$";
const LOG_OPENED_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

/// A backwards jump of the clock larger than this is a midnight rollover.
const ROLLOVER_THRESHOLD_SECS: i64 = 12 * 60 * 60;

/// A single line pattern and the event kind it produces.
///
/// Named groups `source`, `target`, `amount`, `dtype` and `ability` are
/// copied into the event when present.
#[derive(Debug, Clone)]
pub struct TranslationRule {
    kind: CombatEventKind,
    pattern: Regex,
    /// Fills `source` when the pattern has no source group.
    implied_source: Option<&'static str>,
    /// Fills `target` when the pattern has no target group.
    implied_target: Option<&'static str>,
}

impl TranslationRule {
    /// Compile a rule. `body` is matched after the `[HH:MM:SS]` prefix.
    ///
    /// # Errors
    ///
    /// Returns `TranslateError::InvalidPattern` if the regex is invalid.
    pub fn new(kind: CombatEventKind, body: &str) -> Result<Self, TranslateError> {
        Ok(Self {
            kind,
            pattern: Regex::new(&format!("{TIMESTAMP_PREFIX}{body}"))?,
            implied_source: None,
            implied_target: None,
        })
    }

    #[must_use]
    pub fn with_implied_source(mut self, source: &'static str) -> Self {
        self.implied_source = Some(source);
        self
    }

    #[must_use]
    pub fn with_implied_target(mut self, target: &'static str) -> Self {
        self.implied_target = Some(target);
        self
    }

    #[must_use]
    pub fn kind(&self) -> CombatEventKind {
        self.kind
    }

    /// Get the pattern string (for debugging/display).
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Calendar date of the lines being read.
#[derive(Debug, Clone, Copy)]
struct DateCursor {
    date: NaiveDate,
    last_time: Option<NaiveTime>,
}

impl DateCursor {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            last_time: None,
        }
    }

    /// Date for a line logged at `time`.
    fn advance(&mut self, time: NaiveTime) -> NaiveDate {
        if let Some(last) = self.last_time {
            if last.signed_duration_since(time).num_seconds() > ROLLOVER_THRESHOLD_SECS {
                self.date = self.date.succ_opt().unwrap_or(self.date);
                tracing::debug!(date = %self.date, "Log clock wrapped past midnight");
            }
        }
        self.last_time = Some(time);
        self.date
    }
}

/// Regex-based translator for DAoC log lines.
///
/// Tracks the date of the file being read, so one instance serves one file
/// at a time; [`LineTranslator::reset`] starts over for a new file.
#[derive(Debug)]
pub struct DaocTranslator {
    rules: Vec<TranslationRule>,
    log_opened: Option<Regex>,
    time_prefix: Option<Regex>,
    log_date: NaiveDate,
    offset: FixedOffset,
    cursor: Mutex<DateCursor>,
}

impl Default for DaocTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl DaocTranslator {
    /// Translator with the default rules, reading times as local time and
    /// anchored to today's local date.
    #[must_use]
    pub fn new() -> Self {
        let now = Local::now();
        Self::with_date(now.date_naive()).with_offset(now.offset().fix())
    }

    /// Translator with the default rules, anchored to `log_date` in UTC.
    #[must_use]
    pub fn with_date(log_date: NaiveDate) -> Self {
        let mut translator = Self::empty(log_date);
        translator.rules = Self::default_rules()
            .into_iter()
            .filter_map(|result| match result {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to compile default translation rule");
                    None
                }
            })
            .collect();
        translator
    }

    /// Translator with no rules.
    #[must_use]
    pub fn empty(log_date: NaiveDate) -> Self {
        Self {
            rules: Vec::new(),
            log_opened: compile_builtin(LOG_OPENED),
            time_prefix: compile_builtin(TIMESTAMP_PREFIX),
            log_date,
            offset: Utc.fix(),
            cursor: Mutex::new(DateCursor::new(log_date)),
        }
    }

    /// Read logged times in `offset` instead of UTC.
    #[must_use]
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Append a rule. Rules are tried in insertion order.
    pub fn add_rule(&mut self, rule: TranslationRule) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn rules(&self) -> &[TranslationRule] {
        &self.rules
    }

    /// Date used until a header or rollover says otherwise.
    #[must_use]
    pub fn log_date(&self) -> NaiveDate {
        self.log_date
    }

    /// Date assigned to the most recent line.
    #[must_use]
    pub fn current_date(&self) -> NaiveDate {
        self.cursor().date
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn cursor(&self) -> std::sync::MutexGuard<'_, DateCursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed the cursor from a `*** Chat Log Opened:` header.
    fn observe_header(&self, content: &str) -> bool {
        let Some(caps) = self.log_opened.as_ref().and_then(|re| re.captures(content)) else {
            return false;
        };
        match NaiveDateTime::parse_from_str(&caps["opened"], LOG_OPENED_FORMAT) {
            Ok(opened) => {
                let mut cursor = self.cursor();
                cursor.date = opened.date();
                cursor.last_time = Some(opened.time());
                tracing::debug!(date = %cursor.date, "Log date taken from header");
            }
            Err(e) => {
                tracing::debug!(header = content, error = %e, "Unreadable log header date");
            }
        }
        true
    }

    /// Let an unrecognized timestamped line move the clock forward.
    fn observe_time(&self, content: &str) {
        let Some(caps) = self.time_prefix.as_ref().and_then(|re| re.captures(content)) else {
            return;
        };
        if let Ok(time) = NaiveTime::parse_from_str(&caps["ts"], "%H:%M:%S") {
            self.cursor().advance(time);
        }
    }

    fn resolve(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map_or_else(|| naive.and_utc(), |dt| dt.with_timezone(&Utc))
    }

    fn default_rules() -> Vec<Result<TranslationRule, TranslateError>> {
        use CombatEventKind::{
            CrowdControl, DamageDealt, DamageReceived, Death, HealingDone, HealingReceived,
            SpellCast,
        };

        vec![
            TranslationRule::new(
                DamageDealt,
                r"You hit (?:the )?(?P<target>.+?) for (?P<amount>\d+)(?: \([+-]?\d+\))?(?: points of)?(?: (?P<dtype>\w+))? damage[!.]?",
            )
            .map(|r| r.with_implied_source("You")),
            TranslationRule::new(
                DamageReceived,
                r"(?:[Tt]he )?(?P<source>.+?) hits you(?:r [\w ]+?)? for (?P<amount>\d+)(?: \([+-]?\d+\))?(?: points of)?(?: (?P<dtype>\w+))? damage[!.]?",
            )
            .map(|r| r.with_implied_target("You")),
            TranslationRule::new(
                HealingReceived,
                r"You are healed by (?:the )?(?P<source>.+?) for (?P<amount>\d+) hit points?[!.]?",
            )
            .map(|r| r.with_implied_target("You")),
            TranslationRule::new(
                HealingDone,
                r"You heal (?:the )?(?P<target>.+?) for (?P<amount>\d+) hit points?[!.]?",
            )
            .map(|r| r.with_implied_source("You")),
            TranslationRule::new(Death, r"You just killed (?:the )?(?P<target>.+?)!")
                .map(|r| r.with_implied_source("You")),
            TranslationRule::new(
                Death,
                r"(?:[Tt]he )?(?P<target>.+?) was just killed by (?:the )?(?P<source>.+?)!",
            ),
            TranslationRule::new(Death, r"You have died").map(|r| r.with_implied_target("You")),
            TranslationRule::new(Death, r"(?:[Tt]he )?(?P<target>.+?) dies!"),
            TranslationRule::new(
                CrowdControl,
                r"You are (?P<ability>stunned|mesmerized|rooted|snared)!",
            )
            .map(|r| r.with_implied_target("You")),
            TranslationRule::new(
                CrowdControl,
                r"(?:[Tt]he )?(?P<target>.+?) is (?P<ability>stunned|mesmerized|rooted|snared)!",
            ),
            TranslationRule::new(SpellCast, r"You cast an? (?P<ability>.+?) [Ss]pell!")
                .map(|r| r.with_implied_source("You")),
            TranslationRule::new(SpellCast, r"(?:[Tt]he )?(?P<source>.+?) casts a spell!"),
        ]
    }

    fn build_event(
        &self,
        rule: &TranslationRule,
        caps: &Captures<'_>,
        line: &TailLine,
    ) -> Result<CombatEvent, TranslateError> {
        let ts = &caps["ts"];
        let time = NaiveTime::parse_from_str(ts, "%H:%M:%S")
            .map_err(|_| TranslateError::InvalidTimestamp(ts.to_string()))?;
        let amount = caps
            .name("amount")
            .map(|m| {
                m.as_str()
                    .parse::<u64>()
                    .map_err(|_| TranslateError::InvalidAmount(m.as_str().to_string()))
            })
            .transpose()?;
        let date = self.cursor().advance(time);

        let group = |name: &str| caps.name(name).map(|m| normalize_name(m.as_str()));
        let source = group("source").or_else(|| rule.implied_source.map(String::from));
        let target = group("target").or_else(|| rule.implied_target.map(String::from));
        let damage_type = if rule.kind.is_damage() {
            Some(group("dtype").unwrap_or_else(|| "Unknown".to_string()))
        } else {
            None
        };

        Ok(CombatEvent {
            timestamp: self.resolve(date, time),
            kind: rule.kind,
            source,
            target,
            amount,
            damage_type,
            ability: group("ability"),
            line_number: line.line_number,
            raw: line.content.clone(),
        })
    }
}

fn compile_builtin(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .inspect_err(|e| tracing::warn!(error = %e, "Failed to compile built-in pattern"))
        .ok()
}

fn normalize_name(name: &str) -> String {
    match name.trim() {
        "yourself" | "you" => "You".to_string(),
        other => other.to_string(),
    }
}

impl LineTranslator for DaocTranslator {
    fn translate(&self, line: &TailLine) -> Result<Option<CombatEvent>, TranslateError> {
        let content = line.content.trim_end();
        if self.observe_header(content) {
            return Ok(None);
        }
        for rule in &self.rules {
            if let Some(caps) = rule.pattern.captures(content) {
                return self.build_event(rule, &caps, line).map(Some);
            }
        }
        self.observe_time(content);
        Ok(None)
    }

    fn reset(&self) {
        *self.cursor() = DateCursor::new(self.log_date);
    }
}
