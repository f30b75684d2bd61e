//! Services the engines consult but do not own.
//!
//! Each seam is a trait so loops can be driven by mocks in tests:
//! - [`MediaResolver`]: title to media identity, plus library presence
//! - [`SiteProbe`]: promotion and hit-and-run markers from a details page
//! - [`Notifier`]: fire-and-forget user messages

mod media;
mod notify;
mod site;

pub use media::{LibraryReport, MediaInfo, MediaResolver, ResolverError, TitleMediaResolver};
pub use notify::{LogNotifier, Notifier, NotifyError};
pub use site::{HttpSiteProbe, ProbeError, SiteProbe, TorrentAttributes};
