//! `RUST_LOG`-style log filtering.
//!
//! A filter string is a comma-separated list of `level` or
//! `module=level` directives, where the level is one of `critical`,
//! `error`, `warning`, `info`, `debug` or `trace`.  Malformed
//! directives are ignored.

use slog::{Drain, Level, OwnedKVList, Record};
use std::{env, str::FromStr};

/// Drain adapter that drops records not enabled by the directives.
pub struct Filter<D> {
    drain: D,
    directives: Vec<Directive>,
}

struct Directive {
    /// Module prefix the directive applies to; `None` matches all.
    prefix: Option<String>,
    level: Level,
}

impl<D> Filter<D> {
    /// Build the filter from `RUST_LOG`, falling back to `default`.
    pub fn from_env(drain: D, default: &str) -> Self {
        let spec = env::var("RUST_LOG").unwrap_or_else(|_| default.to_string());
        Self {
            drain,
            directives: parse(&spec),
        }
    }

    fn is_enabled(&self, module: &str, level: Level) -> bool {
        // The last directive that matches the module prefix wins.
        self.directives
            .iter()
            .filter(|directive| {
                directive
                    .prefix
                    .as_ref()
                    .map_or(true, |prefix| module.starts_with(prefix.as_str()))
            })
            .last()
            .map(|directive| level <= directive.level)
            .unwrap_or(false)
    }
}

fn parse(spec: &str) -> Vec<Directive> {
    spec.split(',')
        .filter_map(|directive| {
            let mut parts = directive.splitn(2, '=');
            let first = parts.next()?.trim();
            match parts.next() {
                None => Level::from_str(first).ok().map(|level| Directive {
                    prefix: None,
                    level,
                }),
                Some(level) => {
                    let valid = !first.is_empty()
                        && first
                            .chars()
                            .all(|c| matches!(c, '0'..='9' | 'a'..='z' | 'A'..='Z' | ':' | '_'));
                    if !valid {
                        return None;
                    }
                    Level::from_str(level.trim()).ok().map(|level| Directive {
                        prefix: Some(first.to_string()),
                        level,
                    })
                }
            }
        })
        .collect()
}

impl<D> Drain for Filter<D>
where
    D: Drain<Ok = ()>,
{
    type Ok = ();
    type Err = D::Err;

    fn log(&self, record: &Record<'_>, values: &OwnedKVList) -> Result<(), D::Err> {
        if !self.is_enabled(record.module(), record.level()) {
            return Ok(());
        }

        self.drain.log(record, values)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, Filter};
    use slog::{Discard, Level};

    fn filter(spec: &str) -> Filter<Discard> {
        Filter {
            drain: Discard,
            directives: parse(spec),
        }
    }

    #[test]
    fn test_parse_directives() {
        assert_eq!(parse("info").len(), 1);
        assert_eq!(parse("info,usockd=debug").len(), 2);
        // Malformed entries are skipped.
        assert_eq!(parse("bogus,=debug,a=b=c").len(), 0);
    }

    #[test]
    fn test_default_level() {
        let filter = filter("info");
        assert!(filter.is_enabled("usockd::server", Level::Info));
        assert!(filter.is_enabled("usockd::server", Level::Error));
        assert!(!filter.is_enabled("usockd::server", Level::Debug));
    }

    #[test]
    fn test_last_match_wins() {
        let filter = filter("info,usockd=debug");
        assert!(filter.is_enabled("usockd::server", Level::Debug));
        assert!(!filter.is_enabled("notify", Level::Debug));
    }
}
