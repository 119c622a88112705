use crate::event::Source;

/// Ordered prefix table, first match wins. Internal stream kinds come first
/// since they share the `stream.` prefix with chat platform kinds.
const RULES: &[(&str, Source)] = &[
    ("stream.state", Source::InternalStream),
    ("stream.show", Source::InternalStream),
    ("stream.takeover", Source::InternalStream),
    ("stream.goal", Source::InternalStream),
    ("stream.emote_increment", Source::InternalStream),
    ("obs.", Source::Broadcast),
    ("ironmon.", Source::Telemetry),
    ("rainwave.", Source::Music),
    ("system.", Source::System),
    ("twitch.", Source::Chat),
    ("channel.", Source::Chat),
    ("stream.", Source::Chat),
    ("chat.", Source::Chat),
];

/// Source given to kinds no rule claims. Kept for compatibility with existing
/// consumers; every use is reported as an unknown kind fallback.
pub const FALLBACK_SOURCE: Source = Source::Chat;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Classification {
    pub source: Source,
    /// The prefix that matched, `None` when the fallback applied.
    pub rule: Option<&'static str>,
}

impl Classification {
    pub fn is_fallback(&self) -> bool {
        self.rule.is_none()
    }
}

pub fn classify(kind: &str) -> Source {
    classify_detailed(kind).source
}

pub fn classify_detailed(kind: &str) -> Classification {
    RULES
        .iter()
        .find(|(prefix, _)| kind.starts_with(prefix))
        .map(|(prefix, source)| Classification {
            source: *source,
            rule: Some(*prefix),
        })
        .unwrap_or(Classification {
            source: FALLBACK_SOURCE,
            rule: None,
        })
}
