use std::collections::BTreeSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::{CandidateAttrs, MediaKind};

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Lookup failed: {0}")]
    LookupFailed(String),

    #[error("Library unavailable: {0}")]
    LibraryUnavailable(String),
}

/// Media identity resolved from a release title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub kind: MediaKind,
    /// Canonical title.
    pub title: String,
    pub year: Option<i32>,
    /// External identity reference, if the resolver knows one.
    pub identity: Option<String>,
    pub season_number: Option<u32>,
    /// Episodes carried by the release; empty for movies and season packs.
    pub episodes: BTreeSet<u32>,
    pub total_episodes: Option<u32>,
    pub edition: Option<String>,
    pub resolution: Option<String>,
    pub release_group: Option<String>,
}

impl MediaInfo {
    pub fn movie(title: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            kind: MediaKind::Movie,
            title: title.into(),
            year,
            identity: None,
            season_number: None,
            episodes: BTreeSet::new(),
            total_episodes: None,
            edition: None,
            resolution: None,
            release_group: None,
        }
    }

    pub fn tv(title: impl Into<String>, season: u32, episodes: impl IntoIterator<Item = u32>) -> Self {
        Self {
            kind: MediaKind::Tv,
            season_number: Some(season),
            episodes: episodes.into_iter().collect(),
            ..Self::movie(title, None)
        }
    }

    /// Filter attributes for a release of this media.
    pub fn candidate_attrs(&self, raw_title: &str, subtitle: Option<&str>, size_bytes: u64) -> CandidateAttrs {
        let mut attrs = CandidateAttrs::new(raw_title, self.kind, size_bytes);
        if let Some(subtitle) = subtitle {
            attrs = attrs.with_subtitle(subtitle);
        }
        if self.kind == MediaKind::Tv {
            let episodes = if self.episodes.is_empty() {
                self.total_episodes.unwrap_or(0)
            } else {
                self.episodes.len() as u32
            };
            if episodes > 0 {
                attrs = attrs.with_total_episodes(episodes);
            }
        }
        attrs.edition = self.edition.clone();
        attrs.resolution = self.resolution.clone();
        attrs.release_group = self.release_group.clone();
        attrs
    }
}

/// What the media library already holds for a title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryReport {
    pub present: bool,
    /// Episodes present for the requested season.
    pub episodes: BTreeSet<u32>,
}

/// Resolves release titles to media and reports library presence.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve a release title. `Ok(None)` means the title is not media.
    async fn resolve(
        &self,
        title: &str,
        subtitle: Option<&str>,
    ) -> Result<Option<MediaInfo>, ResolverError>;

    /// Library state for `media`. `Ok(None)` means no library is attached.
    async fn library_report(
        &self,
        media: &MediaInfo,
        season: Option<u32>,
    ) -> Result<Option<LibraryReport>, ResolverError>;
}

static SEASON_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bS(\d{1,2})(?:E(\d{1,4})(?:-E?(\d{1,4}))?)?\b").expect("valid regex")
});
static EPISODE_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bE[Pp]?(\d{1,4})\b").expect("valid regex"));
static YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("valid regex"));
static RESOLUTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(4320p|2160p|1080[pi]|720p|576p|480p|4k|8k)\b").expect("valid regex"));
static EDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(remux|blu-?ray|uhd|web-?dl|webrip|hdtv|hdrip|dvdrip|bdrip)\b").expect("valid regex")
});
static RELEASE_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-([A-Za-z0-9][A-Za-z0-9_]*)$").expect("valid regex"));

/// Heuristic resolver working from the release title alone.
///
/// Recognises `SxxEyy` tokens (with ranges), a release year, resolution,
/// source edition and a trailing `-GROUP`. It has no library, so
/// `library_report` always answers `None`.
#[derive(Debug, Default)]
pub struct TitleMediaResolver;

impl TitleMediaResolver {
    pub fn new() -> Self {
        Self
    }

    /// Parse a release title. Pure; exposed for tests and diagnostics.
    pub fn parse(&self, title: &str, subtitle: Option<&str>) -> Option<MediaInfo> {
        let raw = title.trim();
        let stem = strip_extension(raw);

        let season_caps = SEASON_EPISODE.captures(stem);
        let year_match = YEAR.find(stem);
        let resolution_match = RESOLUTION.find(stem);

        // the title ends at the first recognised token
        let cut = [
            season_caps.as_ref().and_then(|c| c.get(0)).map(|m| m.start()),
            year_match.map(|m| m.start()),
            resolution_match.map(|m| m.start()),
        ]
        .into_iter()
        .flatten()
        .filter(|pos| *pos > 0)
        .min()
        .unwrap_or(stem.len());

        let name = clean_title(&stem[..cut]);
        if name.is_empty() {
            return None;
        }

        let mut info = MediaInfo::movie(name, year_match.and_then(|m| m.as_str().parse().ok()));
        info.resolution = resolution_match.map(|m| m.as_str().to_lowercase());
        info.edition = EDITION.find(stem).map(|m| m.as_str().to_lowercase());
        info.release_group = RELEASE_GROUP
            .captures(stem)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        if let Some(caps) = season_caps {
            info.kind = MediaKind::Tv;
            info.season_number = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let first: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());
            let last: Option<u32> = caps.get(3).and_then(|m| m.as_str().parse().ok());
            if let Some(first) = first {
                let last = last.filter(|l| *l >= first).unwrap_or(first);
                info.episodes = (first..=last).collect();
            }
        }

        if info.kind == MediaKind::Tv && info.episodes.is_empty() {
            if let Some(episode) = subtitle
                .and_then(|s| EPISODE_ONLY.captures(s))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
            {
                info.episodes.insert(episode);
            }
        }

        Some(info)
    }
}

#[async_trait]
impl MediaResolver for TitleMediaResolver {
    async fn resolve(
        &self,
        title: &str,
        subtitle: Option<&str>,
    ) -> Result<Option<MediaInfo>, ResolverError> {
        Ok(self.parse(title, subtitle))
    }

    async fn library_report(
        &self,
        _media: &MediaInfo,
        _season: Option<u32>,
    ) -> Result<Option<LibraryReport>, ResolverError> {
        Ok(None)
    }
}

fn strip_extension(title: &str) -> &str {
    for ext in [".torrent", ".mkv", ".mp4", ".avi"] {
        if title.len() > ext.len() && title.to_lowercase().ends_with(ext) {
            return &title[..title.len() - ext.len()];
        }
    }
    title
}

fn clean_title(text: &str) -> String {
    text.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '(' || c == '[' || c.is_whitespace())
        .to_string()
}
