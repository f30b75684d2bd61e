//! Types for filter rule evaluation.

use serde::{Deserialize, Serialize};

use crate::threshold::{self, ThresholdRule};

/// Bytes per GiB, the unit used by size thresholds.
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Kind of media a candidate or subscription refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }
}

/// Promotional class a rule requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoClass {
    /// No promotional requirement.
    #[default]
    Any,
    /// Regular accounting (1.0 up, 1.0 down).
    Normal,
    /// Free download (1.0 up, 0.0 down).
    Free,
    /// Double upload and free download (2.0 up, 0.0 down).
    DoubleFree,
}

impl PromoClass {
    /// Required `(upload_factor, download_factor)`, or `None` for [`PromoClass::Any`].
    pub fn required_factors(&self) -> Option<(f64, f64)> {
        match self {
            PromoClass::Any => None,
            PromoClass::Normal => Some((1.0, 1.0)),
            PromoClass::Free => Some((1.0, 0.0)),
            PromoClass::DoubleFree => Some((2.0, 0.0)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromoClass::Any => "any",
            PromoClass::Normal => "normal",
            PromoClass::Free => "free",
            PromoClass::DoubleFree => "double_free",
        }
    }
}

/// A single filter rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub id: String,
    /// Owning group. Filled in from the enclosing group when loaded from config.
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    /// Lower values are preferred; reported as `100 - priority` on match.
    #[serde(default)]
    pub priority: i32,
    /// Newline-separated patterns that must all match.
    #[serde(default)]
    pub include: String,
    /// Newline-separated patterns, any of which rejects the candidate.
    #[serde(default)]
    pub exclude: String,
    /// Size range in GiB (per episode for series).
    #[serde(default, with = "threshold::optional")]
    pub size_range: Option<ThresholdRule>,
    #[serde(default)]
    pub promo_class: PromoClass,
}

/// A named, ordered collection of filter rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRuleGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

/// Attributes of a candidate that filters inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAttrs {
    /// Raw release title.
    pub title: String,
    /// Secondary title or description.
    #[serde(default)]
    pub subtitle: Option<String>,
    pub kind: MediaKind,
    pub size_bytes: u64,
    /// Episode count of the release (series only).
    #[serde(default)]
    pub total_episodes: Option<u32>,
    #[serde(default)]
    pub upload_factor: Option<f64>,
    #[serde(default)]
    pub download_factor: Option<f64>,
    /// Source/edition tokens such as "BluRay REMUX".
    #[serde(default)]
    pub edition: Option<String>,
    /// Resolution token such as "1080p".
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub release_group: Option<String>,
}

impl CandidateAttrs {
    /// Create attributes with only the title, kind and size set.
    pub fn new(title: impl Into<String>, kind: MediaKind, size_bytes: u64) -> Self {
        Self {
            title: title.into(),
            subtitle: None,
            kind,
            size_bytes,
            total_episodes: None,
            upload_factor: None,
            download_factor: None,
            edition: None,
            resolution: None,
            release_group: None,
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_total_episodes(mut self, episodes: u32) -> Self {
        self.total_episodes = Some(episodes);
        self
    }

    pub fn with_factors(mut self, upload: f64, download: f64) -> Self {
        self.upload_factor = Some(upload);
        self.download_factor = Some(download);
        self
    }

    /// Text that include/exclude patterns are searched in.
    pub fn search_text(&self) -> String {
        match self.subtitle.as_deref() {
            Some(sub) if !sub.is_empty() => format!("{} {}", self.title, sub),
            _ => self.title.clone(),
        }
    }

    /// Human-readable promotional state, e.g. "free" or "unknown".
    pub fn promo_label(&self) -> &'static str {
        match (self.upload_factor, self.download_factor) {
            (Some(up), Some(down)) if up >= 2.0 && down == 0.0 => "2x free",
            (Some(_), Some(down)) if down == 0.0 => "free",
            (Some(_), Some(_)) => "normal",
            _ => "unknown",
        }
    }
}

/// Which rule group an ad-hoc evaluation should finish with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RuleRef {
    /// The default group, if one is configured.
    #[default]
    Default,
    /// A specific group by id.
    Group(String),
    /// Skip group evaluation entirely.
    Skip,
}

impl RuleRef {
    /// `Group(id)` when `id` is set, otherwise `Default`.
    pub fn group_or_default(id: Option<&str>) -> Self {
        match id {
            Some(id) if !id.is_empty() => RuleRef::Group(id.to_string()),
            _ => RuleRef::Default,
        }
    }
}

/// Unordered conjunction of optional predicates for on-demand filtering.
#[derive(Debug, Clone, Default)]
pub struct AdhocFilter {
    /// Edition alias (`BLURAY`, `WEB`, ...) or pattern.
    pub restype: Option<String>,
    /// Resolution alias (`1080p`, `4k`, ...) or pattern.
    pub pix: Option<String>,
    /// Release group pattern.
    pub team: Option<String>,
    /// Required factors as `"<up> <down>"`; `*` matches anything.
    pub promo: Option<String>,
    pub include: Option<String>,
    pub exclude: Option<String>,
    pub keyword: Option<String>,
    pub rule: RuleRef,
}

/// Result of a filter evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub matched: bool,
    /// Tie-break priority; higher is preferred.
    pub priority: i32,
    pub rationale: String,
}

impl FilterOutcome {
    pub fn accept(priority: i32, rationale: impl Into<String>) -> Self {
        Self {
            matched: true,
            priority,
            rationale: rationale.into(),
        }
    }

    pub fn reject(rationale: impl Into<String>) -> Self {
        Self {
            matched: false,
            priority: 0,
            rationale: rationale.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promo_required_factors() {
        assert_eq!(PromoClass::Any.required_factors(), None);
        assert_eq!(PromoClass::Free.required_factors(), Some((1.0, 0.0)));
        assert_eq!(PromoClass::DoubleFree.required_factors(), Some((2.0, 0.0)));
    }

    #[test]
    fn test_search_text_joins_subtitle() {
        let attrs = CandidateAttrs::new("Foo.2020", MediaKind::Movie, 0).with_subtitle("Director's Cut");
        assert_eq!(attrs.search_text(), "Foo.2020 Director's Cut");

        let bare = CandidateAttrs::new("Foo.2020", MediaKind::Movie, 0);
        assert_eq!(bare.search_text(), "Foo.2020");
    }

    #[test]
    fn test_promo_label() {
        let attrs = CandidateAttrs::new("x", MediaKind::Movie, 0);
        assert_eq!(attrs.promo_label(), "unknown");
        assert_eq!(attrs.clone().with_factors(2.0, 0.0).promo_label(), "2x free");
        assert_eq!(attrs.clone().with_factors(1.0, 0.0).promo_label(), "free");
        assert_eq!(attrs.with_factors(1.0, 1.0).promo_label(), "normal");
    }

    #[test]
    fn test_deserialize_group_from_toml() {
        let toml = r#"
id = "g1"
name = "Default"
is_default = true

[[rules]]
id = "r1"
name = "1080p"
priority = 1
include = "1080p"
size_range = "bw#1,10"
promo_class = "free"
"#;
        let group: FilterRuleGroup = toml::from_str(toml).unwrap();
        assert!(group.is_default);
        assert_eq!(group.rules.len(), 1);
        assert_eq!(group.rules[0].promo_class, PromoClass::Free);
        assert_eq!(
            group.rules[0].size_range,
            Some(ThresholdRule::between(1.0, 10.0).unwrap())
        );
    }
}
