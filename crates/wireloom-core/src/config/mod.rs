//! A minimal hierarchical key/value tree (component A's interface).
//!
//! Full config-language features — `!link`, `!import`, change callbacks —
//! are a Non-goal; the core only needs dotted-path get/set/sub and the URL
//! grammar below, which is what channels and the processor actually consume
//! at runtime.

mod url;

pub use url::parse_url;

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Value(String),
    List(Vec<ConfigNode>),
    Map(BTreeMap<String, ConfigNode>),
}

impl ConfigNode {
    fn map_mut(&mut self) -> &mut BTreeMap<String, ConfigNode> {
        if !matches!(self, ConfigNode::Map(_)) {
            *self = ConfigNode::Map(BTreeMap::new());
        }
        match self {
            ConfigNode::Map(m) => m,
            _ => unreachable!(),
        }
    }
}

/// A config subtree. Cheap to clone (shares no internal refcounting — config
/// trees are small and short-lived, copied wholesale the way channels
/// publish their per-channel state subtree).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    root: BTreeMap<String, ConfigNode>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// Dotted-path lookup, e.g. `get("tll.internal")`.
    pub fn get(&self, path: &str) -> Option<&str> {
        let mut node = self.root.get(Self::first_segment(path))?;
        let mut rest = Self::rest_segments(path);
        loop {
            match rest {
                None => {
                    return match node {
                        ConfigNode::Value(v) => Some(v.as_str()),
                        _ => None,
                    };
                }
                Some(r) => {
                    let map = match node {
                        ConfigNode::Map(m) => m,
                        _ => return None,
                    };
                    node = map.get(Self::first_segment(r))?;
                    rest = Self::rest_segments(r);
                }
            }
        }
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.get(path) {
            Some("yes") | Some("true") | Some("1") => true,
            Some("no") | Some("false") | Some("0") => false,
            _ => default,
        }
    }

    pub fn set(&mut self, path: &str, value: impl Into<String>) {
        let segs: Vec<&str> = path.split('.').collect();
        let mut map = &mut self.root;
        for (i, seg) in segs.iter().enumerate() {
            if i + 1 == segs.len() {
                map.insert((*seg).to_string(), ConfigNode::Value(value.into()));
                return;
            }
            map = map
                .entry((*seg).to_string())
                .or_insert_with(|| ConfigNode::Map(BTreeMap::new()))
                .map_mut();
        }
    }

    /// Returns the subtree rooted at `path`, if it is a map.
    pub fn sub(&self, path: &str) -> Option<Config> {
        let mut node = self.root.get(Self::first_segment(path))?;
        let mut rest = Self::rest_segments(path);
        loop {
            match rest {
                None => {
                    return match node {
                        ConfigNode::Map(m) => Some(Config { root: m.clone() }),
                        _ => None,
                    };
                }
                Some(r) => {
                    let map = match node {
                        ConfigNode::Map(m) => m,
                        _ => return None,
                    };
                    node = map.get(Self::first_segment(r))?;
                    rest = Self::rest_segments(r);
                }
            }
        }
    }

    /// Iterates immediate children keys of `path` (used to walk `objects.*`).
    pub fn keys(&self, path: &str) -> Vec<String> {
        self.sub(path)
            .map(|c| c.root.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Iterates this config's own top-level keys, e.g. the object names
    /// directly under the `objects` subtree once the caller has already
    /// called `config.sub("objects")`.
    pub fn root_keys(&self) -> Vec<String> {
        self.root.keys().cloned().collect()
    }

    fn first_segment(path: &str) -> &str {
        path.split('.').next().unwrap_or(path)
    }

    fn rest_segments(path: &str) -> Option<&str> {
        path.split_once('.').map(|(_, rest)| rest)
    }

    pub fn from_yaml_str(s: &str) -> crate::error::Result<Config> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(s).map_err(|e| crate::error::Error::Url(e.to_string()))?;
        Ok(Config {
            root: yaml_to_map(value),
        })
    }
}

fn yaml_to_node(v: serde_yaml::Value) -> ConfigNode {
    match v {
        serde_yaml::Value::Mapping(_) => ConfigNode::Map(yaml_to_map(v)),
        serde_yaml::Value::Sequence(seq) => ConfigNode::List(seq.into_iter().map(yaml_to_node).collect()),
        serde_yaml::Value::Bool(b) => ConfigNode::Value(if b { "yes".into() } else { "no".into() }),
        serde_yaml::Value::Null => ConfigNode::Value(String::new()),
        other => ConfigNode::Value(
            other
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| other.as_i64().map(|i| i.to_string()).unwrap_or_default()),
        ),
    }
}

fn yaml_to_map(v: serde_yaml::Value) -> BTreeMap<String, ConfigNode> {
    match v {
        serde_yaml::Value::Mapping(m) => m
            .into_iter()
            .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), yaml_to_node(v))))
            .collect(),
        _ => BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_get_set_roundtrip() {
        let mut c = Config::new();
        c.set("tll.internal", "yes");
        c.set("name", "chan1");
        assert_eq!(c.get("tll.internal"), Some("yes"));
        assert_eq!(c.get("name"), Some("chan1"));
        assert_eq!(c.get("missing.path"), None);
    }

    #[test]
    fn yaml_object_keys_walk() {
        let c = Config::from_yaml_str(
            "objects:\n  a:\n    url: direct://;name=a\n  b:\n    url: direct://;name=b\n",
        )
        .unwrap();
        let mut keys = c.keys("objects");
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
