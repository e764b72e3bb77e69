//! Transcript classifiers
//!
//! Each classifier is a plain function from a cleaned transcript to an
//! optional intent. The router evaluates them in table order and the first
//! match wins. A classifier that recognizes the topic but cannot extract what
//! it needs (no time, no duration) returns `None` so the transcript falls
//! through to the remote reply.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDateTime, NaiveTime, TimeDelta, Weekday};
use regex::Regex;

use super::info::InfoTopic;
use crate::media::MediaCommand;
use crate::schedule::parse::{normalize_numbers, parse_duration, parse_time_of_day, parse_weekday, parse_when};
use crate::schedule::{EventKind, RecurrenceRule, ReminderSchedule};

/// A locally handled request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Silence whatever rings, or abort the current turn
    Stop { kind: Option<EventKind> },
    Snooze { minutes: Option<i64> },
    StartTimer { duration: TimeDelta, label: Option<String> },
    SetAlarm { time: NaiveTime, recurrence: RecurrenceRule, label: Option<String> },
    CreateReminder { schedule: ReminderSchedule, message: String },
    AddTime { duration: TimeDelta, label: Option<String> },
    Cancel { kind: EventKind, all: bool, label: Option<String> },
    List { kind: EventKind },
    Info(InfoTopic),
    Music(MediaCommand),
}

impl Intent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stop { .. } => "stop",
            Self::Snooze { .. } => "snooze",
            Self::StartTimer { .. } => "start_timer",
            Self::SetAlarm { .. } => "set_alarm",
            Self::CreateReminder { .. } => "create_reminder",
            Self::AddTime { .. } => "add_time",
            Self::Cancel { .. } => "cancel",
            Self::List { .. } => "list",
            Self::Info(_) => "info",
            Self::Music(_) => "music",
        }
    }

    /// Whether this intent may interrupt a ringing entity or a running turn
    #[must_use]
    pub const fn is_interrupt(&self) -> bool {
        matches!(self, Self::Stop { .. } | Self::Snooze { .. })
    }
}

/// Classifier signature
pub type Classifier = fn(&str, NaiveDateTime) -> Option<Intent>;

/// Ordered classifier table
pub const CLASSIFIERS: &[(&str, Classifier)] = &[
    ("stop", stop),
    ("snooze", snooze),
    ("cancel", cancel),
    ("list", list),
    ("add_time", add_time),
    ("timer", timer),
    ("alarm", alarm),
    ("reminder", reminder),
    ("info", info),
    ("music", music),
];

static STOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:ok(?:ay)? )?(?:stop|silence|dismiss|quiet|be quiet|shut up|enough|never ?mind|turn (?:it|that) off|turn off the (?:alarm|timer|reminder)s?|i'm up|im up)(?: (?:it|that|now|ringing|the (alarm|timer|reminder)s?|(alarm|timer|reminder)s?))?$",
    )
    .expect("valid regex")
});

static SNOOZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^snooze(?: (?:it|that|the alarm|the reminder))?(?: (?:for )?(.+))?$").expect("valid regex")
});

static CANCEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:cancel|delete|remove|clear)\b(.*)\b(alarm|timer|reminder)(s?)\b(.*)$").expect("valid regex")
});

static LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:what|which|list|show|tell me|do i have|are there|how many|any)\b.*\b(alarm|timer|reminder)s?\b").expect("valid regex")
});

static TIME_LEFT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:how (?:much time|long)(?: is)? left|time (?:is )?left|how long until)\b").expect("valid regex")
});

static ADD_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:add|put)\s+(?:another\s+)?(.+?)(?:\s+(?:more|extra))?(?:\s+(?:to|on)\s+(?:the\s+|my\s+)?(?:([a-z]+)\s+)?timer)?$",
    )
    .expect("valid regex")
});

static TIMER_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:called|named|labell?ed|for the)\s+([a-z][a-z ]*)$").expect("valid regex")
});

static WORD_BEFORE_TIMER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z]+) timer\b").expect("valid regex"));

static TIME_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2}(?:[:. ]\d{2})?(?:\s*[ap]\.?m\b\.?)?|noon|midnight)").expect("valid regex")
});

static IN_DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bin\s+(.+)$").expect("valid regex"));

static REPEAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\b(every day|daily|every week|weekly|every month|monthly|every (\d+) months)\b").expect("valid regex")
});

static WHEN_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s(?:in|at|on|by|tomorrow|tonight|today|this|next)\b").expect("valid regex")
});

static WHEN_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:in|at|on|tomorrow|tonight|today|this)\b.*?)\s+(?:to|that)\s+(.+)$").expect("valid regex")
});

/// Words that are never timer labels
const NOT_LABELS: &[&str] = &[
    "a", "an", "the", "my", "new", "another", "second", "seconds", "minute", "minutes", "hour",
    "hours", "min", "mins", "sec", "secs", "set", "start", "this", "that", "kitchen",
];

/// Lowercase, spell numbers as digits, drop filler and punctuation
#[must_use]
pub fn clean(transcript: &str) -> String {
    let normalized = normalize_numbers(transcript);
    let stripped: String = normalized
        .chars()
        .map(|c| if matches!(c, ',' | '!' | '?' | ';' | '"') { ' ' } else { c })
        .collect();
    let mut text = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    while text.ends_with('.') && !(text.ends_with("a.m.") || text.ends_with("p.m.")) {
        text.pop();
    }

    for filler in ["please ", "can you ", "could you ", "would you ", "hey ", "hearth "] {
        if let Some(rest) = text.strip_prefix(filler) {
            text = rest.to_string();
        }
    }
    if let Some(rest) = text.strip_suffix(" please") {
        text = rest.to_string();
    }
    text.trim().to_string()
}

fn kind_of(word: &str) -> Option<EventKind> {
    word.parse().ok()
}

fn stop(text: &str, _now: NaiveDateTime) -> Option<Intent> {
    let caps = STOP.captures(text)?;
    let kind = caps
        .get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| kind_of(m.as_str()))
        .or_else(|| {
            ["alarm", "timer", "reminder"]
                .iter()
                .find(|k| text.contains(*k))
                .and_then(|k| kind_of(k))
        });
    Some(Intent::Stop { kind })
}

fn snooze(text: &str, _now: NaiveDateTime) -> Option<Intent> {
    let caps = SNOOZE.captures(text)?;
    let minutes = match caps.get(1) {
        Some(m) => Some(parse_duration(m.as_str()).ok()?.num_minutes().max(1)),
        None => None,
    };
    Some(Intent::Snooze { minutes })
}

fn cancel(text: &str, _now: NaiveDateTime) -> Option<Intent> {
    let caps = CANCEL.captures(text)?;
    let before = caps[1].trim();
    let kind = kind_of(&caps[2])?;
    let plural = !caps[3].is_empty();
    let all = plural || before.split_whitespace().any(|w| w == "all" || w == "every");

    let label = before
        .split_whitespace()
        .filter(|w| !matches!(*w, "the" | "my" | "all" | "every" | "of" | "this" | "that"))
        .collect::<Vec<_>>()
        .join(" ");
    let label = Some(label).filter(|l| !l.is_empty() && !all);
    Some(Intent::Cancel { kind, all, label })
}

fn list(text: &str, _now: NaiveDateTime) -> Option<Intent> {
    if TIME_LEFT.is_match(text) {
        return Some(Intent::List { kind: EventKind::Timer });
    }
    let caps = LIST.captures(text)?;
    Some(Intent::List {
        kind: kind_of(&caps[1])?,
    })
}

fn add_time(text: &str, _now: NaiveDateTime) -> Option<Intent> {
    let caps = ADD_TIME.captures(text)?;
    let duration = parse_duration(caps.get(1)?.as_str()).ok()?;
    let label = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .filter(|l| !NOT_LABELS.contains(&l.as_str()));
    Some(Intent::AddTime { duration, label })
}

fn timer(text: &str, _now: NaiveDateTime) -> Option<Intent> {
    if !text.contains("timer") {
        return None;
    }

    let mut body = text.to_string();
    let mut label = None;
    if let Some(caps) = TIMER_LABEL.captures(text) {
        label = Some(caps[1].trim().to_string());
        body = text[..caps.get(0)?.start()].to_string();
    }
    if label.is_none() {
        label = WORD_BEFORE_TIMER
            .captures(&body)
            .map(|c| c[1].to_string())
            .filter(|w| !NOT_LABELS.contains(&w.as_str()) && w.parse::<u32>().is_err());
    }

    let duration = parse_duration(&body).ok()?;
    Some(Intent::StartTimer { duration, label })
}

fn alarm(text: &str, now: NaiveDateTime) -> Option<Intent> {
    let anchor = text.find("alarm").or_else(|| text.find("wake me"))?;
    let label = TIMER_LABEL.captures(text).map(|c| c[1].trim().to_string());
    let body = match TIMER_LABEL.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    };

    let recurrence = alarm_recurrence(body);

    // "alarm in 20 minutes" rings once at now + duration
    if let Some(caps) = IN_DURATION.captures(&body[anchor.min(body.len())..]) {
        if let Ok(duration) = parse_duration(&caps[1]) {
            return Some(Intent::SetAlarm {
                time: (now + duration).time(),
                recurrence: RecurrenceRule::None,
                label,
            });
        }
    }

    let time = TIME_TOKEN
        .find_iter(body)
        .find_map(|m| parse_time_of_day(m.as_str()).ok())
        .or_else(|| {
            ["morning", "afternoon", "evening", "night"]
                .iter()
                .find(|w| body.contains(*w))
                .and_then(|w| parse_time_of_day(w).ok())
        })?;

    Some(Intent::SetAlarm {
        time,
        recurrence,
        label,
    })
}

fn alarm_recurrence(text: &str) -> RecurrenceRule {
    if text.contains("every day") || text.contains("daily") || text.contains("every morning") {
        return RecurrenceRule::Daily;
    }
    if text.contains("weekday") || text.contains("work day") || text.contains("workday") {
        return RecurrenceRule::Weekdays;
    }
    if text.contains("weekend") {
        return RecurrenceRule::Weekends;
    }

    let repeating = text.contains("every ") || text.split_whitespace().any(|w| w.ends_with("days"));
    if !repeating {
        return RecurrenceRule::None;
    }
    let mut days: Vec<Weekday> = Vec::new();
    for day in text.split_whitespace().filter_map(parse_weekday) {
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        RecurrenceRule::None
    } else {
        days.sort_by_key(Weekday::num_days_from_monday);
        RecurrenceRule::Weekly { days }
    }
}

fn reminder(text: &str, now: NaiveDateTime) -> Option<Intent> {
    let rest = text
        .strip_prefix("remind me")
        .or_else(|| text.strip_prefix("set a reminder"))
        .or_else(|| text.strip_prefix("create a reminder"))?
        .trim();

    let mut repeat = None;
    let rest = match REPEAT.captures(rest) {
        Some(caps) => {
            repeat = Some((caps[1].to_string(), caps.get(2).map(|m| m.as_str().to_string())));
            REPEAT.replace(rest, "").trim().to_string()
        }
        None => rest.to_string(),
    };

    // "at 5 to call mum", else the leftmost trailing phrase that reads as a time
    let (when, message) = match WHEN_PREFIX.captures(&rest) {
        Some(caps) => (resolve_when(&caps[1], now)?, caps[2].to_string()),
        None => WHEN_START.find_iter(&rest).find_map(|m| {
            let when = resolve_when(&rest[m.start()..], now)?;
            Some((when, rest[..m.start()].to_string()))
        })?,
    };

    let message = message
        .trim()
        .trim_start_matches("to ")
        .trim_start_matches("that ")
        .trim_start_matches("about ")
        .trim()
        .to_string();
    if message.is_empty() {
        return None;
    }

    let schedule = match repeat {
        None => ReminderSchedule::Once { when },
        Some((word, months)) => {
            let rule = match (word.as_str(), months) {
                ("every day" | "daily", _) => RecurrenceRule::Daily,
                ("every week" | "weekly", _) => RecurrenceRule::Weekly {
                    days: vec![when.weekday()],
                },
                ("every month" | "monthly", _) => RecurrenceRule::Monthly { day: when.day() },
                (_, Some(n)) => RecurrenceRule::IntervalMonths {
                    months: n.parse().ok().filter(|m| *m > 0)?,
                },
                _ => return None,
            };
            ReminderSchedule::Recurring { rule, base: when }
        }
    };

    Some(Intent::CreateReminder { schedule, message })
}

/// `parse_when` plus spoken forms it does not cover ("on friday at 5", "this evening")
fn resolve_when(phrase: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let phrase = phrase.trim();
    let phrase = phrase
        .strip_prefix("by ")
        .map_or(phrase.to_string(), |p| format!("at {p}"));

    if let Some(word) = phrase.strip_prefix("this ") {
        return parse_when(&format!("today {word}"), now).ok();
    }

    let day_phrase = phrase
        .strip_prefix("on ")
        .or_else(|| phrase.strip_prefix("next "))
        .unwrap_or(&phrase);
    let mut words = day_phrase.splitn(2, ' ');
    if let Some(day) = words.next().and_then(parse_weekday) {
        let time = match words.next() {
            Some(rest) => parse_time_of_day(rest).ok()?,
            None => crate::schedule::rules::default_time(),
        };
        let ahead = (i64::from(day.num_days_from_monday()) - i64::from(now.weekday().num_days_from_monday()))
            .rem_euclid(7);
        let mut at = (now.date() + TimeDelta::days(ahead)).and_time(time);
        if at <= now {
            at += TimeDelta::days(7);
        }
        return Some(at);
    }

    parse_when(&phrase, now).ok()
}

fn info(text: &str, _now: NaiveDateTime) -> Option<Intent> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let has = |set: &[&str]| words.iter().any(|w| set.contains(w));

    if has(&["weather", "forecast", "temperature", "umbrella", "raining", "rain"])
        || text.contains("how hot")
        || text.contains("how cold")
        || text.contains("how warm")
    {
        return Some(Intent::Info(InfoTopic::Weather));
    }
    if has(&["news", "headlines", "headline"]) {
        return Some(Intent::Info(InfoTopic::News));
    }
    if has(&["score", "scores", "scoreboard", "sports"]) || text.contains("who won") {
        return Some(Intent::Info(InfoTopic::Sports));
    }
    None
}

fn music(text: &str, _now: NaiveDateTime) -> Option<Intent> {
    let text = text
        .trim_end_matches(" the music")
        .trim_end_matches(" music")
        .trim_end_matches(" the song")
        .trim_end_matches(" playback");
    let command = match text {
        "pause" | "stop" | "hold" => MediaCommand::Pause,
        "resume" | "unpause" | "continue" | "play" | "keep playing" | "start" => MediaCommand::Resume,
        "next" | "skip" | "next song" | "skip this song" | "next track" | "skip song" => MediaCommand::Next,
        "previous" | "go back" | "previous song" | "last song" | "previous track" => MediaCommand::Previous,
        "volume up" | "louder" | "turn it up" | "turn up" | "turn up the volume" | "turn the volume up" => {
            MediaCommand::VolumeUp
        }
        "volume down" | "quieter" | "turn it down" | "turn down" | "turn down the volume"
        | "turn the volume down" => MediaCommand::VolumeDown,
        other => {
            let source = other.strip_prefix("play ")?.trim().trim_start_matches("some ");
            if source.is_empty() {
                return None;
            }
            MediaCommand::Play(source.to_string())
        }
    };
    Some(Intent::Music(command))
}
