use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::{debug, warn};

use super::{FeedError, FeedItem};

/// Parse an RSS 2.0 document into feed items.
///
/// Items without a title are skipped. An item without an enclosure uses its
/// link as the enclosure (and then has no detail page); an item with neither
/// is skipped. A malformed document is an error unless some items were
/// already parsed, in which case those are returned.
pub fn parse_feed(xml: &[u8]) -> Result<Vec<FeedItem>, FeedError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut items = Vec::new();
    let mut buf = Vec::new();

    let mut current_item: Option<ItemBuilder> = None;
    let mut current_element = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = element_name(&e);
                if name == "item" {
                    current_item = Some(ItemBuilder::default());
                } else if name == "enclosure" {
                    if let Some(item) = current_item.as_mut() {
                        item.read_enclosure(&e);
                    }
                }
                current_element = name;
            }
            Ok(Event::Empty(e)) => {
                if element_name(&e) == "enclosure" {
                    if let Some(item) = current_item.as_mut() {
                        item.read_enclosure(&e);
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(builder) = current_item.take() {
                        match builder.build() {
                            Some(item) => items.push(item),
                            None => debug!("Skipping feed item without title or link"),
                        }
                    }
                }
                current_element.clear();
            }
            Ok(Event::Text(e)) => {
                if let Some(item) = current_item.as_mut() {
                    let text = e.unescape().unwrap_or_default();
                    item.append(&current_element, &text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(item) = current_item.as_mut() {
                    let raw = e.into_inner();
                    item.append(&current_element, &String::from_utf8_lossy(&raw));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                if items.is_empty() {
                    return Err(FeedError::Parse(format!(
                        "XML error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
                warn!(
                    "Feed is malformed after {} items, keeping those: {}",
                    items.len(),
                    e
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

/// Parse an RSS date (RFC 2822, falling back to RFC 3339).
pub(crate) fn parse_pub_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc2822(text)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[derive(Default)]
struct ItemBuilder {
    title: String,
    link: String,
    description: String,
    enclosure: Option<String>,
    length: Option<String>,
    pub_date: String,
}

impl ItemBuilder {
    fn append(&mut self, element: &str, text: &str) {
        let target = match element {
            "title" => &mut self.title,
            "link" => &mut self.link,
            "description" => &mut self.description,
            "pubDate" => &mut self.pub_date,
            _ => return,
        };
        target.push_str(text);
    }

    fn read_enclosure(&mut self, e: &BytesStart<'_>) {
        for attr in e.attributes().flatten() {
            let value = match attr.unescape_value() {
                Ok(v) => v.to_string(),
                Err(_) => continue,
            };
            match attr.key.as_ref() {
                b"url" => self.enclosure = Some(value),
                b"length" => self.length = Some(value),
                _ => {}
            }
        }
    }

    fn build(self) -> Option<FeedItem> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return None;
        }

        let link = non_empty(self.link);
        let (enclosure_url, detail_url) = match non_empty(self.enclosure.unwrap_or_default()) {
            Some(enclosure) => (enclosure, link),
            None => (link?, None),
        };

        let size_bytes = self
            .length
            .and_then(|l| l.trim().parse::<u64>().ok())
            .unwrap_or(0);

        Some(FeedItem {
            title,
            enclosure_url,
            detail_url,
            description: non_empty(self.description),
            size_bytes,
            published_at: parse_pub_date(&self.pub_date),
        })
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Tracker feed</title>
    <item>
      <title>Some.Movie.2020.1080p.BluRay.x264-GRP</title>
      <link>https://tracker.example/details.php?id=1</link>
      <description><![CDATA[Some Movie <b>Director's Cut</b>]]></description>
      <enclosure url="https://tracker.example/download.php?id=1&amp;passkey=x" length="3221225472" type="application/x-bittorrent"/>
      <pubDate>Tue, 10 Jun 2025 08:00:00 +0800</pubDate>
    </item>
    <item>
      <title>Link.Only.S01E02</title>
      <link>magnet:?xt=urn:btih:abcdef</link>
    </item>
    <item>
      <title></title>
      <enclosure url="https://tracker.example/download.php?id=3" length="1"/>
    </item>
    <item>
      <title>No.Link.Anywhere</title>
    </item>
    <item>
      <title>Bad.Length</title>
      <enclosure url="https://tracker.example/download.php?id=5" length="unknown"/>
      <pubDate>not a date</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_items() {
        let items = parse_feed(FEED.as_bytes()).unwrap();
        assert_eq!(items.len(), 3);

        let first = &items[0];
        assert_eq!(first.title, "Some.Movie.2020.1080p.BluRay.x264-GRP");
        assert_eq!(
            first.enclosure_url,
            "https://tracker.example/download.php?id=1&passkey=x"
        );
        assert_eq!(
            first.detail_url.as_deref(),
            Some("https://tracker.example/details.php?id=1")
        );
        assert_eq!(first.size_bytes, 3_221_225_472);
        assert_eq!(first.description.as_deref(), Some("Some Movie <b>Director's Cut</b>"));
        assert_eq!(first.published_at.unwrap().year(), 2025);
    }

    #[test]
    fn test_link_only_item_uses_link_as_enclosure() {
        let items = parse_feed(FEED.as_bytes()).unwrap();
        let link_only = &items[1];
        assert_eq!(link_only.enclosure_url, "magnet:?xt=urn:btih:abcdef");
        assert_eq!(link_only.detail_url, None);
        assert_eq!(link_only.size_bytes, 0);
    }

    #[test]
    fn test_bad_length_and_date() {
        let items = parse_feed(FEED.as_bytes()).unwrap();
        let bad = &items[2];
        assert_eq!(bad.title, "Bad.Length");
        assert_eq!(bad.size_bytes, 0);
        assert_eq!(bad.published_at, None);
    }

    #[test]
    fn test_malformed_document_errors() {
        let result = parse_feed(b"<rss><channel><item><title>x</titl></item>");
        assert!(matches!(result, Err(FeedError::Parse(_))));
    }

    #[test]
    fn test_malformed_tail_keeps_parsed_items() {
        let xml = r#"<rss><channel>
            <item><title>Good</title><enclosure url="https://e/1" length="10"/></item>
            <item><title>Broken</titl></item>"#;
        let items = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Good");
    }

    #[test]
    fn test_parse_pub_date_formats() {
        assert!(parse_pub_date("Mon, 02 Jan 2006 15:04:05 GMT").is_some());
        assert!(parse_pub_date("2006-01-02T15:04:05Z").is_some());
        assert!(parse_pub_date("yesterday").is_none());
    }
}
