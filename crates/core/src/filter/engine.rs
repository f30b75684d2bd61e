use regex_lite::Regex;
use tracing::{debug, warn};

use super::pattern;
use super::types::{
    AdhocFilter, CandidateAttrs, FilterOutcome, FilterRule, FilterRuleGroup, MediaKind,
    PromoClass, RuleRef, GIB,
};

/// Edition aliases accepted by ad-hoc `restype` filters.
const RESTYPE_ALIASES: &[(&str, &str)] = &[
    ("BLURAY", r"Blu-?Ray|BD|BDRIP"),
    ("REMUX", r"REMUX"),
    ("DOLBY", r"DOLBY|DOVI|\s+DV$|\s+DV\s+"),
    ("WEB", r"WEB-?DL|WEBRIP"),
    ("HDTV", r"U?HDTV"),
    ("UHD", r"UHD"),
    ("HDR", r"HDR"),
    ("3D", r"3D"),
];

/// Resolution aliases accepted by ad-hoc `pix` filters.
const PIX_ALIASES: &[(&str, &str)] = &[
    ("8k", r"8K"),
    ("4k", r"4K|2160P|X2160"),
    ("1080p", r"1080[PIX]|X1080"),
    ("720p", r"720P"),
];

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: FilterRule,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl CompiledRule {
    fn new(mut rule: FilterRule, group_id: &str) -> Self {
        if rule.group_id.is_empty() {
            rule.group_id = group_id.to_string();
        }
        let include = pattern::lines(&rule.include)
            .filter_map(pattern::compile)
            .collect();
        let exclude = pattern::lines(&rule.exclude)
            .filter_map(pattern::compile)
            .collect();
        Self {
            rule,
            include,
            exclude,
        }
    }

    /// Check every predicate, returning the reason of the first failure.
    fn check(&self, attrs: &CandidateAttrs, text: &str) -> Result<(), String> {
        let name = &self.rule.name;

        if let Some(re) = self.include.iter().find(|re| !re.is_match(text)) {
            return Err(format!(
                "rule '{}': include pattern '{}' not found",
                name,
                re.as_str()
            ));
        }

        if let Some(re) = self.exclude.iter().find(|re| re.is_match(text)) {
            return Err(format!(
                "rule '{}': exclude pattern '{}' matched",
                name,
                re.as_str()
            ));
        }

        if let Some(range) = &self.rule.size_range {
            if let Some(size) = comparable_size(attrs) {
                if !range.evaluate_scaled(size, GIB) {
                    return Err(format!(
                        "rule '{}': size {:.2} GiB outside {} GiB",
                        name,
                        size / GIB,
                        range
                    ));
                }
            }
        }

        if let (Some((required_ul, required_dl)), Some(ul), Some(dl)) = (
            self.rule.promo_class.required_factors(),
            attrs.upload_factor,
            attrs.download_factor,
        ) {
            if required_ul > ul || required_dl < dl {
                return Err(format!(
                    "rule '{}': requires {} promotion, candidate is {}",
                    name,
                    self.rule.promo_class.as_str(),
                    attrs.promo_label()
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CompiledGroup {
    id: String,
    name: String,
    is_default: bool,
    rules: Vec<CompiledRule>,
}

/// Size the range is compared against: total for movies, per episode for
/// series with a known episode count. `None` skips the size predicate.
fn comparable_size(attrs: &CandidateAttrs) -> Option<f64> {
    match attrs.kind {
        MediaKind::Movie => Some(attrs.size_bytes as f64),
        MediaKind::Tv => attrs
            .total_episodes
            .filter(|n| *n > 0)
            .map(|n| attrs.size_bytes as f64 / n as f64),
    }
}

/// Evaluates candidates against an immutable snapshot of filter rule groups.
///
/// Patterns are compiled once at construction. A pattern that fails to
/// compile is dropped from its rule and logged, so that predicate never
/// rejects anything.
#[derive(Debug, Clone, Default)]
pub struct FilterRuleEngine {
    groups: Vec<CompiledGroup>,
}

impl FilterRuleEngine {
    pub fn new(groups: Vec<FilterRuleGroup>) -> Self {
        let defaults = groups.iter().filter(|g| g.is_default).count();
        if defaults > 1 {
            warn!(
                "{} filter groups are flagged as default, using the first one",
                defaults
            );
        }

        let groups = groups
            .into_iter()
            .map(|group| {
                let rules = group
                    .rules
                    .into_iter()
                    .map(|rule| CompiledRule::new(rule, &group.id))
                    .collect();
                CompiledGroup {
                    id: group.id,
                    name: group.name,
                    is_default: group.is_default,
                    rules,
                }
            })
            .collect();

        Self { groups }
    }

    /// Id of the default group, if one is configured.
    pub fn default_group_id(&self) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.is_default)
            .map(|g| g.id.as_str())
    }

    fn resolve(&self, group_id: Option<&str>) -> Option<&CompiledGroup> {
        match group_id {
            Some(id) => {
                let found = self.groups.iter().find(|g| g.id == id);
                if found.is_none() {
                    warn!("Filter group '{}' not found, accepting without rules", id);
                }
                found
            }
            None => self.groups.iter().find(|g| g.is_default),
        }
    }

    /// Evaluate `attrs` against a group's rules in stored order.
    ///
    /// Without `group_id` the default group is used. When no group
    /// resolves, everything is accepted with priority 0. The first rule whose
    /// predicates all pass wins with priority `100 - rule.priority`.
    pub fn evaluate(&self, attrs: &CandidateAttrs, group_id: Option<&str>) -> FilterOutcome {
        let Some(group) = self.resolve(group_id) else {
            return FilterOutcome::accept(0, "no rule configured");
        };

        if group.rules.is_empty() {
            return FilterOutcome::accept(0, group.name.clone());
        }

        let text = attrs.search_text();
        let mut first_failure: Option<String> = None;

        for compiled in &group.rules {
            match compiled.check(attrs, &text) {
                Ok(()) => {
                    debug!(
                        "'{}' matched rule '{}' of group '{}'",
                        attrs.title, compiled.rule.name, group.name
                    );
                    return FilterOutcome::accept(
                        100 - compiled.rule.priority,
                        format!(
                            "matched rule '{}' of group '{}'",
                            compiled.rule.name, group.name
                        ),
                    );
                }
                Err(reason) => {
                    first_failure.get_or_insert(reason);
                }
            }
        }

        FilterOutcome::reject(format!(
            "group '{}': {}",
            group.name,
            first_failure.unwrap_or_default()
        ))
    }

    /// Evaluate an ad-hoc filter: every present field must pass, then the
    /// referenced rule group (if any) decides priority and rationale.
    pub fn evaluate_adhoc(&self, attrs: &CandidateAttrs, filter: &AdhocFilter) -> FilterOutcome {
        if let Some(reason) = adhoc_failure(attrs, filter) {
            return FilterOutcome::reject(reason);
        }

        match &filter.rule {
            RuleRef::Skip => FilterOutcome::accept(0, "ad-hoc filter matched"),
            RuleRef::Default => self.evaluate(attrs, None),
            RuleRef::Group(id) => self.evaluate(attrs, Some(id)),
        }
    }

    /// Whether any rule in the resolved group needs promotional factors,
    /// i.e. whether a detail-page probe is worth doing before evaluation.
    pub fn requires_promo_probe(&self, group_id: Option<&str>) -> bool {
        self.resolve(group_id)
            .map(|g| {
                g.rules
                    .iter()
                    .any(|r| r.rule.promo_class != PromoClass::Any)
            })
            .unwrap_or(false)
    }
}

fn alias_pattern<'a>(aliases: &[(&str, &'static str)], value: &'a str) -> &'a str {
    aliases
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(value))
        .map(|(_, pattern)| *pattern)
        .unwrap_or(value)
}

/// A failing pattern search. Invalid patterns never fail.
fn rejects(pattern: &str, text: &str) -> bool {
    pattern::search(pattern, text) == Some(false)
}

fn adhoc_failure(attrs: &CandidateAttrs, filter: &AdhocFilter) -> Option<String> {
    if let Some(restype) = non_empty(&filter.restype) {
        let Some(edition) = non_empty(&attrs.edition) else {
            return Some(format!("resource type '{}' unknown for candidate", restype));
        };
        if rejects(alias_pattern(RESTYPE_ALIASES, restype), edition) {
            return Some(format!("resource type '{}' not matched", restype));
        }
    }

    if let Some(pix) = non_empty(&filter.pix) {
        let Some(resolution) = non_empty(&attrs.resolution) else {
            return Some(format!("resolution '{}' unknown for candidate", pix));
        };
        if rejects(alias_pattern(PIX_ALIASES, pix), resolution) {
            return Some(format!("resolution '{}' not matched", pix));
        }
    }

    if let Some(team) = non_empty(&filter.team) {
        let haystack = non_empty(&attrs.release_group).unwrap_or(&attrs.title);
        if rejects(team, haystack) {
            return Some(format!("release group '{}' not matched", team));
        }
    }

    if let Some(promo) = non_empty(&filter.promo) {
        if !promo_matches(promo, attrs) {
            return Some(format!(
                "promotion '{}' not matched, candidate is {}",
                promo,
                attrs.promo_label()
            ));
        }
    }

    let text = attrs.search_text();

    if let Some(keyword) = non_empty(&filter.keyword) {
        if rejects(keyword, &text) {
            return Some(format!("keyword '{}' not found", keyword));
        }
    }

    if let Some(include) = non_empty(&filter.include) {
        if let Some(line) = pattern::lines(include).find(|p| rejects(p, &text)) {
            return Some(format!("include pattern '{}' not found", line));
        }
    }

    if let Some(exclude) = non_empty(&filter.exclude) {
        if let Some(line) = pattern::lines(exclude).find(|p| pattern::search(p, &text) == Some(true)) {
            return Some(format!("exclude pattern '{}' matched", line));
        }
    }

    None
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `"<ul> <dl>"` with `*` matching any factor. Unknown candidate factors
/// only satisfy wildcards.
fn promo_matches(promo: &str, attrs: &CandidateAttrs) -> bool {
    let mut parts = promo.split_whitespace();
    let expected = [parts.next().unwrap_or("*"), parts.next().unwrap_or("*")];
    let actual = [attrs.upload_factor, attrs.download_factor];

    expected.iter().zip(actual).all(|(want, have)| {
        if *want == "*" {
            return true;
        }
        match (want.parse::<f64>(), have) {
            (Ok(want), Some(have)) => (want - have).abs() < f64::EPSILON,
            (Err(_), _) => {
                warn!("Ignoring malformed promotion factor '{}'", want);
                true
            }
            (Ok(_), None) => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::ThresholdRule;

    fn rule(id: &str, priority: i32) -> FilterRule {
        FilterRule {
            id: id.to_string(),
            group_id: String::new(),
            name: id.to_string(),
            priority,
            include: String::new(),
            exclude: String::new(),
            size_range: None,
            promo_class: PromoClass::Any,
        }
    }

    fn group(id: &str, is_default: bool, rules: Vec<FilterRule>) -> FilterRuleGroup {
        FilterRuleGroup {
            id: id.to_string(),
            name: format!("{} group", id),
            is_default,
            rules,
        }
    }

    fn movie(title: &str, gib: f64) -> CandidateAttrs {
        CandidateAttrs::new(title, MediaKind::Movie, (gib * GIB) as u64)
    }

    #[test]
    fn test_no_default_group_accepts() {
        let engine = FilterRuleEngine::new(vec![group("g1", false, vec![rule("r1", 1)])]);
        let outcome = engine.evaluate(&movie("Anything", 1.0), None);
        assert_eq!(outcome, FilterOutcome::accept(0, "no rule configured"));
    }

    #[test]
    fn test_unknown_group_accepts() {
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![rule("r1", 1)])]);
        let outcome = engine.evaluate(&movie("Anything", 1.0), Some("missing"));
        assert!(outcome.matched);
        assert_eq!(outcome.priority, 0);
    }

    #[test]
    fn test_empty_group_accepts_with_group_name() {
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![])]);
        let outcome = engine.evaluate(&movie("Anything", 1.0), None);
        assert_eq!(outcome, FilterOutcome::accept(0, "g1 group"));
    }

    #[test]
    fn test_size_range_scenario() {
        let mut sized = rule("sized", 10);
        sized.size_range = ThresholdRule::parse("bw#1,4").unwrap();
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![sized])]);

        let ok = engine.evaluate(&movie("Movie.2020.1080p", 3.0), None);
        assert!(ok.matched);
        assert_eq!(ok.priority, 90);

        let too_big = engine.evaluate(&movie("Movie.2020.1080p", 5.0), None);
        assert!(!too_big.matched);
        assert_eq!(too_big.priority, 0);
        assert!(too_big.rationale.contains("bw#1,4"), "{}", too_big.rationale);
        assert!(too_big.rationale.contains("size"), "{}", too_big.rationale);
    }

    #[test]
    fn test_series_size_is_per_episode() {
        let mut sized = rule("sized", 0);
        sized.size_range = ThresholdRule::parse("bw#1,2").unwrap();
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![sized])]);

        let season = CandidateAttrs::new("Show.S01", MediaKind::Tv, (15.0 * GIB) as u64)
            .with_total_episodes(10);
        assert!(engine.evaluate(&season, None).matched);

        let unknown_count = CandidateAttrs::new("Show.S01", MediaKind::Tv, (50.0 * GIB) as u64);
        assert!(engine.evaluate(&unknown_count, None).matched);

        let heavy = CandidateAttrs::new("Show.S01", MediaKind::Tv, (50.0 * GIB) as u64)
            .with_total_episodes(10);
        assert!(!engine.evaluate(&heavy, None).matched);
    }

    #[test]
    fn test_include_lines_all_required() {
        let mut r = rule("r", 0);
        r.include = "1080p\nBluRay\n".to_string();
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![r])]);

        assert!(engine.evaluate(&movie("Movie.1080p.BLURAY", 1.0), None).matched);
        let outcome = engine.evaluate(&movie("Movie.1080p.WEB-DL", 1.0), None);
        assert!(!outcome.matched);
        assert!(outcome.rationale.contains("BluRay"));
    }

    #[test]
    fn test_exclude_any_line_rejects() {
        let mut r = rule("r", 0);
        r.exclude = "CAM\nTS".to_string();
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![r])]);

        assert!(engine.evaluate(&movie("Movie.1080p", 1.0), None).matched);
        assert!(!engine.evaluate(&movie("Movie.CAM", 1.0), None).matched);
        assert!(!engine
            .evaluate(&movie("Movie", 1.0).with_subtitle("TS source"), None)
            .matched);
    }

    #[test]
    fn test_first_rule_in_order_wins() {
        let mut strict = rule("strict", 1);
        strict.include = "2160p".to_string();
        let loose = rule("loose", 5);
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![strict, loose])]);

        let uhd = engine.evaluate(&movie("Movie.2160p", 1.0), None);
        assert_eq!(uhd.priority, 99);
        assert!(uhd.rationale.contains("strict"));

        let hd = engine.evaluate(&movie("Movie.1080p", 1.0), None);
        assert_eq!(hd.priority, 95);
        assert!(hd.rationale.contains("loose"));
    }

    #[test]
    fn test_rationale_reports_first_failing_rule() {
        let mut a = rule("a", 1);
        a.include = "2160p".to_string();
        let mut b = rule("b", 2);
        b.exclude = "Movie".to_string();
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![a, b])]);

        let outcome = engine.evaluate(&movie("Movie.1080p", 1.0), None);
        assert!(!outcome.matched);
        assert!(outcome.rationale.starts_with("group 'g1 group'"));
        assert!(outcome.rationale.contains("rule 'a'"));
    }

    #[test]
    fn test_invalid_pattern_fails_open() {
        let mut r = rule("r", 0);
        r.include = "([broken".to_string();
        r.exclude = "([also broken".to_string();
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![r])]);
        assert!(engine.evaluate(&movie("Movie", 1.0), None).matched);
    }

    #[test]
    fn test_promo_only_checked_when_both_sides_known() {
        let mut free = rule("free", 0);
        free.promo_class = PromoClass::Free;
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![free])]);

        assert!(engine.evaluate(&movie("Movie", 1.0), None).matched);
        assert!(engine
            .evaluate(&movie("Movie", 1.0).with_factors(1.0, 0.0), None)
            .matched);
        assert!(engine
            .evaluate(&movie("Movie", 1.0).with_factors(2.0, 0.0), None)
            .matched);
        let normal = engine.evaluate(&movie("Movie", 1.0).with_factors(1.0, 1.0), None);
        assert!(!normal.matched);
        assert!(normal.rationale.contains("free"));
    }

    #[test]
    fn test_double_free_rejects_plain_free() {
        let mut r = rule("r", 0);
        r.promo_class = PromoClass::DoubleFree;
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![r])]);
        assert!(!engine
            .evaluate(&movie("Movie", 1.0).with_factors(1.0, 0.0), None)
            .matched);
    }

    #[test]
    fn test_evaluate_is_pure() {
        let mut r = rule("r", 3);
        r.include = "1080p".to_string();
        r.size_range = ThresholdRule::parse("lt#10").unwrap();
        let engine = FilterRuleEngine::new(vec![group("g1", true, vec![r])]);

        for attrs in [movie("Movie.1080p", 2.0), movie("Movie.720p", 2.0), movie("Movie.1080p", 20.0)] {
            let first = engine.evaluate(&attrs, None);
            let second = engine.evaluate(&attrs, None);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_adhoc_aliases() {
        let engine = FilterRuleEngine::default();
        let mut attrs = movie("Movie.2020.2160p.BluRay.REMUX-GRP", 40.0);
        attrs.edition = Some("BluRay REMUX".to_string());
        attrs.resolution = Some("2160p".to_string());
        attrs.release_group = Some("GRP".to_string());

        let filter = AdhocFilter {
            restype: Some("BLURAY".to_string()),
            pix: Some("4k".to_string()),
            team: Some("grp".to_string()),
            ..Default::default()
        };
        assert!(engine.evaluate_adhoc(&attrs, &filter).matched);

        let wrong_pix = AdhocFilter {
            pix: Some("1080p".to_string()),
            ..Default::default()
        };
        let outcome = engine.evaluate_adhoc(&attrs, &wrong_pix);
        assert!(!outcome.matched);
        assert!(outcome.rationale.contains("1080p"));
    }

    #[test]
    fn test_adhoc_restype_requires_candidate_edition() {
        let engine = FilterRuleEngine::default();
        let filter = AdhocFilter {
            restype: Some("WEB".to_string()),
            ..Default::default()
        };
        assert!(!engine.evaluate_adhoc(&movie("Movie.WEB-DL", 1.0), &filter).matched);
    }

    #[test]
    fn test_adhoc_promo_wildcards() {
        let engine = FilterRuleEngine::default();
        let free = movie("Movie", 1.0).with_factors(1.0, 0.0);

        let any_up_free_down = AdhocFilter {
            promo: Some("* 0".to_string()),
            ..Default::default()
        };
        assert!(engine.evaluate_adhoc(&free, &any_up_free_down).matched);

        let double = AdhocFilter {
            promo: Some("2 0".to_string()),
            ..Default::default()
        };
        assert!(!engine.evaluate_adhoc(&free, &double).matched);
        assert!(!engine
            .evaluate_adhoc(&movie("Movie", 1.0), &any_up_free_down)
            .matched);
    }

    #[test]
    fn test_adhoc_falls_through_to_group() {
        let mut r = rule("r", 20);
        r.include = "1080p".to_string();
        let engine = FilterRuleEngine::new(vec![
            group("g1", true, vec![r.clone()]),
            group("g2", false, vec![rule("any", 40)]),
        ]);

        let filter = AdhocFilter {
            keyword: Some("movie".to_string()),
            ..Default::default()
        };
        let outcome = engine.evaluate_adhoc(&movie("Movie.1080p", 1.0), &filter);
        assert_eq!(outcome.priority, 80);

        let by_group = AdhocFilter {
            rule: RuleRef::Group("g2".to_string()),
            ..Default::default()
        };
        assert_eq!(engine.evaluate_adhoc(&movie("Movie.720p", 1.0), &by_group).priority, 60);

        let skipped = AdhocFilter {
            rule: RuleRef::Skip,
            ..Default::default()
        };
        let outcome = engine.evaluate_adhoc(&movie("Movie.720p", 1.0), &skipped);
        assert!(outcome.matched);
        assert_eq!(outcome.priority, 0);
    }

    #[test]
    fn test_adhoc_include_exclude() {
        let engine = FilterRuleEngine::default();
        let filter = AdhocFilter {
            include: Some("1080p\nx264".to_string()),
            exclude: Some("HDR".to_string()),
            rule: RuleRef::Skip,
            ..Default::default()
        };
        assert!(engine.evaluate_adhoc(&movie("Movie.1080p.x264", 1.0), &filter).matched);
        assert!(!engine.evaluate_adhoc(&movie("Movie.1080p.x265", 1.0), &filter).matched);
        assert!(!engine
            .evaluate_adhoc(&movie("Movie.1080p.x264.HDR", 1.0), &filter)
            .matched);
    }

    #[test]
    fn test_requires_promo_probe() {
        let mut free = rule("free", 0);
        free.promo_class = PromoClass::Free;
        let engine = FilterRuleEngine::new(vec![
            group("plain", true, vec![rule("r", 0)]),
            group("promo", false, vec![rule("r", 0), free]),
        ]);
        assert!(!engine.requires_promo_probe(None));
        assert!(engine.requires_promo_probe(Some("promo")));
        assert!(!engine.requires_promo_probe(Some("missing")));
        assert_eq!(engine.default_group_id(), Some("plain"));
    }
}
