use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration.
///
/// Threshold encodings are already checked during deserialization; this
/// checks what serde cannot:
/// - server port and engine intervals are non-zero
/// - ids are unique per section (rule ids across all groups)
/// - at most one filter group is the default
/// - every reference (task site/downloader, site and subscription filter
///   groups) resolves
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    let engine = &config.engine;
    if engine.seen_cache_capacity == 0 {
        return invalid("engine.seen_cache_capacity cannot be 0");
    }
    if engine.subscription_interval_minutes == 0 || engine.lifecycle_interval_minutes == 0 {
        return invalid("engine intervals cannot be 0");
    }

    unique("downloaders", config.downloaders.iter().map(|d| d.id.as_str()))?;
    unique("sites", config.sites.iter().map(|s| s.id.as_str()))?;
    unique("filter_groups", config.filter_groups.iter().map(|g| g.id.as_str()))?;
    unique(
        "filter rules",
        config
            .filter_groups
            .iter()
            .flat_map(|g| g.rules.iter().map(|r| r.id.as_str())),
    )?;
    unique("brush_tasks", config.brush_tasks.iter().map(|t| t.id.as_str()))?;
    unique("subscriptions", config.subscriptions.iter().map(|s| s.id.as_str()))?;

    let defaults = config.filter_groups.iter().filter(|g| g.is_default).count();
    if defaults > 1 {
        return invalid(format!(
            "{} filter groups are marked is_default, at most one is allowed",
            defaults
        ));
    }

    let group_exists = |id: &str| config.filter_groups.iter().any(|g| g.id == id);

    for downloader in &config.downloaders {
        if downloader.host.trim().is_empty() {
            return invalid(format!("downloader '{}' has no host", downloader.id));
        }
    }

    for site in &config.sites {
        if let Some(group) = site.filter_rule.as_deref() {
            if !group_exists(group) {
                return invalid(format!(
                    "site '{}' references unknown filter group '{}'",
                    site.id, group
                ));
            }
        }
    }

    for task in &config.brush_tasks {
        if task.interval_minutes == 0 {
            return invalid(format!("brush task '{}' has interval_minutes = 0", task.id));
        }
        if config.site(&task.site).is_none() {
            return invalid(format!(
                "brush task '{}' references unknown site '{}'",
                task.id, task.site
            ));
        }
        if config.downloader(&task.downloader).is_none() {
            return invalid(format!(
                "brush task '{}' references unknown downloader '{}'",
                task.id, task.downloader
            ));
        }
        if matches!(task.retained_volume_ceiling, Some(v) if v <= 0.0 || !v.is_finite()) {
            return invalid(format!(
                "brush task '{}' has a non-positive retained_volume_ceiling",
                task.id
            ));
        }
    }

    for sub in &config.subscriptions {
        if let Some(group) = sub.filter_rule.as_deref() {
            if !group_exists(group) {
                return invalid(format!(
                    "subscription '{}' references unknown filter group '{}'",
                    sub.id, group
                ));
            }
        }
        if let Some(downloader) = sub.downloader.as_deref() {
            if config.downloader(downloader).is_none() {
                return invalid(format!(
                    "subscription '{}' references unknown downloader '{}'",
                    sub.id, downloader
                ));
            }
        }
        for site in &sub.rss_sites {
            if config.site(site).is_none() {
                return invalid(format!(
                    "subscription '{}' references unknown site '{}'",
                    sub.id, site
                ));
            }
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

fn unique<'a>(section: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return invalid(format!("{} contain an empty id", section));
        }
        if !seen.insert(id) {
            return invalid(format!("duplicate id '{}' in {}", id, section));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    const BASE: &str = r#"
[[downloaders]]
id = "qb"
backend_kind = "qbittorrent"
host = "localhost"
port = 8080

[[sites]]
id = "site-a"
rss_url = "https://tracker.example/rss"

[[filter_groups]]
id = "default"
name = "Default"
is_default = true
"#;

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&parse(BASE)).is_ok());
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = parse("[server]\nport = 0\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_two_default_groups_fails() {
        let toml = format!(
            "{}\n[[filter_groups]]\nid = \"other\"\nname = \"Other\"\nis_default = true\n",
            BASE
        );
        let err = validate_config(&parse(&toml)).unwrap_err();
        assert!(err.to_string().contains("is_default"));
    }

    #[test]
    fn test_validate_duplicate_ids_fail() {
        let toml = format!(
            "{}\n[[sites]]\nid = \"site-a\"\n",
            BASE
        );
        let err = validate_config(&parse(&toml)).unwrap_err();
        assert!(err.to_string().contains("duplicate id 'site-a'"));
    }

    #[test]
    fn test_validate_task_references() {
        let toml = format!(
            "{}\n[[brush_tasks]]\nid = \"t1\"\nname = \"Farm\"\nsite = \"site-a\"\ndownloader = \"tr\"\n",
            BASE
        );
        let err = validate_config(&parse(&toml)).unwrap_err();
        assert!(err.to_string().contains("unknown downloader 'tr'"));
    }

    #[test]
    fn test_validate_subscription_filter_group() {
        let toml = format!(
            "{}\n[[subscriptions]]\nid = \"s1\"\nkind = \"tv\"\ntitle = \"Show\"\nfilter_rule = \"nope\"\n",
            BASE
        );
        let err = validate_config(&parse(&toml)).unwrap_err();
        assert!(err.to_string().contains("unknown filter group 'nope'"));
    }
}
