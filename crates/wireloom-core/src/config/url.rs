use super::Config;
use crate::error::{Error, Result};

/// Parsed form of the URL grammar in §6:
///
/// ```text
/// url := proto "://" host (";" kv)*
/// kv  := key "=" value
/// ```
///
/// `proto` becomes the channel's protocol tag, `host` its connection target,
/// and every `kv` is set on the returned [`Config`] at its dotted path.
/// `tll.channel.<tag>` keys accumulate comma-separated values into a list
/// rather than overwriting, since a channel can expose several tags.
pub fn parse_url(url: &str) -> Result<(String, String, Config)> {
    let (proto, rest) = url
        .split_once("://")
        .ok_or_else(|| Error::Url(format!("missing `://` in `{url}`")))?;
    if proto.is_empty() {
        return Err(Error::Url(format!("empty protocol in `{url}`")));
    }
    let mut parts = rest.split(';');
    let host = parts.next().unwrap_or("").to_string();

    let mut config = Config::new();
    config.set("tll.proto", proto);
    config.set("tll.host", &host);

    for kv in parts {
        if kv.is_empty() {
            continue;
        }
        let (key, value) = kv
            .split_once('=')
            .ok_or_else(|| Error::Url(format!("malformed key=value pair `{kv}` in `{url}`")))?;
        if key.starts_with("tll.channel.") {
            let existing = config.get(key).map(str::to_string);
            let merged = match existing {
                Some(e) if !e.is_empty() => format!("{e},{value}"),
                _ => value.to_string(),
            };
            config.set(key, merged);
        } else {
            config.set(key, value);
        }
    }

    Ok((proto.to_string(), host, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proto_host_and_kv() {
        let (proto, host, cfg) = parse_url("pub+tcp://./t.sock;mode=server;size=64kb").unwrap();
        assert_eq!(proto, "pub+tcp");
        assert_eq!(host, "./t.sock");
        assert_eq!(cfg.get("mode"), Some("server"));
        assert_eq!(cfg.get("size"), Some("64kb"));
    }

    #[test]
    fn empty_host_is_allowed() {
        let (proto, host, _) = parse_url("direct://;name=a").unwrap();
        assert_eq!(proto, "direct");
        assert_eq!(host, "");
    }

    #[test]
    fn missing_scheme_separator_is_an_error() {
        assert!(parse_url("not-a-url").is_err());
    }

    #[test]
    fn channel_tag_keys_accumulate() {
        let (_, _, cfg) = parse_url("tcp://;tll.channel.input=a;tll.channel.input=b").unwrap();
        assert_eq!(cfg.get("tll.channel.input"), Some("a,b"));
    }
}
