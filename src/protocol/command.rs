// src/protocol/command.rs - Command URI decoding
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use thiserror::Error;

/// Scheme prefix every control command starts with.
pub const SCHEME: &str = "printago://";

/// Query parameters in the order they first appeared.
pub type Parameters = IndexMap<String, String>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The frame does not use the control scheme; callers drop it silently.
    #[error("not a control command")]
    NotACommand,
    #[error("expected 3 path segments, found {0}")]
    SegmentCount(usize),
}

/// A decoded control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_type: String,
    pub action: String,
    pub parameters: Parameters,
    /// The raw frame, echoed back in every envelope this command produces.
    pub original: String,
}

impl Command {
    /// Decode a raw frame.
    ///
    /// The path after the scheme must hold exactly three non-empty segments:
    /// an ignored authority, the command type and the action.
    pub fn decode(raw: &str) -> Result<Self, ParseError> {
        let raw = raw.trim();
        let rest = raw.strip_prefix(SCHEME).ok_or(ParseError::NotACommand)?;
        let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, query),
            None => (rest, ""),
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() != 3 {
            return Err(ParseError::SegmentCount(segments.len()));
        }

        Ok(Self {
            command_type: segments[1].to_string(),
            action: segments[2].to_string(),
            parameters: parse_query(query),
            original: raw.to_string(),
        })
    }

    /// Parameter value by key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Parameter value by key, treating an empty value as absent.
    pub fn non_empty_param(&self, key: &str) -> Option<&str> {
        self.param(key).filter(|v| !v.is_empty())
    }

    /// The `printer_id` the command targets, if any.
    pub fn target_id(&self) -> Option<&str> {
        self.non_empty_param("printer_id")
    }

    /// Parameters sharing a prefix, e.g. `axes[X]=10` or `axes.X=10` for prefix `axes`.
    /// Yields `(suffix, value)` in parameter order.
    pub fn prefixed_params<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.parameters.iter().filter_map(move |(key, value)| {
            let rest = key.strip_prefix(prefix)?;
            let name = if let Some(inner) = rest.strip_prefix('[') {
                inner.strip_suffix(']')?
            } else {
                rest.strip_prefix('.')?
            };
            (!name.is_empty()).then_some((name, value.as_str()))
        })
    }
}

/// Split a query string on `&`, each pair on its first `=`, percent-decoding
/// keys and values independently. A repeated key keeps its first position and
/// its last value.
pub fn parse_query(query: &str) -> Parameters {
    let mut params = Parameters::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(unescape(key), unescape(value));
    }
    params
}

fn unescape(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}
