use std::collections::BTreeMap;

/// A `server.properties` document that keeps its original layout.
///
/// Comments, blank lines and key order survive a parse/render cycle; only
/// the values of keys passed to [`Properties::set`] change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    lines: Vec<Line>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Verbatim(String),
}

impl Properties {
    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .map(|raw| {
                let trimmed = raw.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    return Line::Verbatim(raw.to_string());
                }
                match raw.split_once('=') {
                    Some((key, value)) => Line::Entry {
                        key: key.trim().to_string(),
                        value: value.trim().to_string(),
                    },
                    None => Line::Verbatim(raw.to_string()),
                }
            })
            .collect();

        Self { lines }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Replaces every occurrence of `key` in place, or appends it.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut found = false;
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    found = true;
                }
            }
        }

        if !found {
            self.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Entry { key, value } => Some((key.clone(), value.clone())),
                Line::Verbatim(_) => None,
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push('=');
                    out.push_str(value);
                }
                Line::Verbatim(raw) => out.push_str(raw),
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_preserves_layout() {
        let mut props = Properties::parse("#Minecraft server properties\nmotd=Hello\n\nmax-players=20\n");

        props.set("motd", "Welcome back");
        props.set("difficulty", "hard");

        assert_eq!(
            props.render(),
            "#Minecraft server properties\nmotd=Welcome back\n\nmax-players=20\ndifficulty=hard\n"
        );
    }

    #[test]
    fn test_map_ignores_comments() {
        let props = Properties::parse("# comment\nlevel-name = world\nbroken line\n");
        let map = props.to_map();

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("level-name").map(String::as_str), Some("world"));
        assert_eq!(props.get("level-name"), Some("world"));
    }
}
