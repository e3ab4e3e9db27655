//! Backing file format.
//!
//! The backing file is an XML property list whose root dictionary has a
//! single `NVRAM` entry holding the nested store:
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <!DOCTYPE plist ...>
//!     <plist version="1.0">
//! <dict>
//! <key>NVRAM</key>
//! <dict><key>boot-args</key><string>-v</string>
//!       <key>GUID</key><dict><key>local</key><data>AQID</data></dict></dict>
//! </dict></plist>
//! ```
//!
//! The header and footer are fixed literals. Values are written on a single
//! line; on read, newlines and tabs are stripped before parsing because
//! other serializers wrap base64 payloads across lines. Literal tabs and
//! newlines inside strings are therefore written as character references.
//!
//! Kernel serializers write a repeated object once with an `ID` attribute
//! and refer back to it with `<reference IDREF="..."/>`; such references
//! are resolved on read. Nesting deeper than [`MAX_DEPTH`] is rejected.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use thiserror::Error;

use crate::value::{Dictionary, Value};

/// Fixed document header, up to and including the `NVRAM` root key.
pub const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
\t<plist version=\"1.0\">\n<dict>\n<key>NVRAM</key>\n";

/// Fixed document footer.
pub const FOOTER: &str = "</dict></plist>\n";

/// Key of the nested store inside the root dictionary.
pub const ROOT_KEY: &str = "NVRAM";

/// Deepest accepted dictionary nesting, counting the plist root.
pub const MAX_DEPTH: usize = 64;

/// Upper bound on values materialized through `<reference>` tags.
const MAX_REFERENCED_VALUES: usize = 1 << 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document is not valid UTF-8")]
    InvalidUtf8,

    #[error("unexpected end of document")]
    UnexpectedEof,

    #[error("expected {expected}, found {found}")]
    UnexpectedTag { expected: String, found: String },

    #[error("unsupported value tag: {0}")]
    UnsupportedTag(String),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid base64 data: {0}")]
    InvalidBase64(String),

    #[error("invalid character reference: {0}")]
    InvalidEntity(String),

    #[error("dictionaries nested deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("reference to unknown ID: {0}")]
    UnknownReference(String),

    #[error("references expand to more than {MAX_REFERENCED_VALUES} values")]
    TooManyReferences,

    #[error("root dictionary has no NVRAM dictionary")]
    MissingRoot,
}

// ============================================================================
// Writing
// ============================================================================

/// Serialize a nested store into a complete document.
pub fn encode_document(root: &Dictionary) -> String {
    let mut out = String::with_capacity(HEADER.len() + FOOTER.len() + 64 * root.len());
    out.push_str(HEADER);
    write_dictionary(&mut out, root);
    out.push_str(FOOTER);
    out
}

fn write_dictionary(out: &mut String, dict: &Dictionary) {
    out.push_str("<dict>");
    for (key, value) in dict.iter() {
        out.push_str("<key>");
        escape_into(out, key);
        out.push_str("</key>");
        write_value(out, value);
    }
    out.push_str("</dict>");
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => {
            out.push_str("<string>");
            escape_into(out, s);
            out.push_str("</string>");
        }
        Value::Bytes(bytes) => {
            out.push_str("<data>");
            out.push_str(&BASE64_STANDARD.encode(bytes));
            out.push_str("</data>");
        }
        Value::Integer(n) => {
            out.push_str("<integer>");
            out.push_str(&n.to_string());
            out.push_str("</integer>");
        }
        Value::Boolean(true) => out.push_str("<true/>"),
        Value::Boolean(false) => out.push_str("<false/>"),
        Value::Dictionary(dict) => write_dictionary(out, dict),
    }
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#9;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

// ============================================================================
// Reading
// ============================================================================

/// Parse a complete document and return the nested store under `NVRAM`.
pub fn decode_document(bytes: &[u8]) -> Result<Dictionary, DocumentError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DocumentError::InvalidUtf8)?;
    let cleaned = strip_layout_whitespace(text);

    let mut parser = Parser::new(&cleaned);
    parser.skip_prolog();

    let plist = parser.next_tag()?;
    if plist.name != "plist" || plist.kind != TagKind::Open {
        return Err(DocumentError::UnexpectedTag {
            expected: "<plist>".to_string(),
            found: plist.describe(),
        });
    }

    let root_tag = parser.next_tag()?;
    let root = match parser.parse_value(&root_tag, 0)? {
        Value::Dictionary(dict) => dict,
        _ => return Err(DocumentError::MissingRoot),
    };
    parser.expect_close("plist")?;

    match root.into_iter().find(|(k, _)| k == ROOT_KEY) {
        Some((_, Value::Dictionary(nvram))) => Ok(nvram),
        _ => Err(DocumentError::MissingRoot),
    }
}

/// Remove the newline and tab characters other serializers inject into
/// base64 payloads.
fn strip_layout_whitespace(text: &str) -> String {
    text.chars().filter(|c| *c != '\n' && *c != '\t').collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Open,
    Close,
    Empty,
}

#[derive(Debug)]
struct Tag<'a> {
    name: &'a str,
    kind: TagKind,
    attributes: &'a str,
}

impl<'a> Tag<'a> {
    fn describe(&self) -> String {
        match self.kind {
            TagKind::Open => format!("<{}>", self.name),
            TagKind::Close => format!("</{}>", self.name),
            TagKind::Empty => format!("<{}/>", self.name),
        }
    }

    /// Value of a `name="value"` attribute. Entities are not expanded.
    fn attribute(&self, name: &str) -> Option<&'a str> {
        let mut rest = self.attributes;
        loop {
            rest = rest.trim_start();
            let eq = rest.find('=')?;
            let key = rest[..eq].trim();
            let after = rest[eq + 1..].trim_start();
            let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
            let close = after[1..].find(quote)?;
            if key == name {
                return Some(&after[1..1 + close]);
            }
            rest = &after[close + 2..];
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Values declared with an `ID` attribute, for `<reference>`.
    ids: HashMap<String, Value>,
    referenced: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            ids: HashMap::new(),
            referenced: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    /// Skip the XML declaration, doctype and comments.
    fn skip_prolog(&mut self) {
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            let terminator = if rest.starts_with("<?") {
                "?>"
            } else if rest.starts_with("<!--") {
                "-->"
            } else if rest.starts_with("<!") {
                ">"
            } else {
                return;
            };
            match rest.find(terminator) {
                Some(end) => self.pos += end + terminator.len(),
                None => {
                    self.pos = self.input.len();
                    return;
                }
            }
        }
    }

    fn next_tag(&mut self) -> Result<Tag<'a>, DocumentError> {
        self.skip_whitespace();
        let rest = self.rest();
        if rest.is_empty() {
            return Err(DocumentError::UnexpectedEof);
        }
        if !rest.starts_with('<') {
            let found: String = rest.chars().take(16).collect();
            return Err(DocumentError::UnexpectedTag {
                expected: "tag".to_string(),
                found,
            });
        }
        let end = rest.find('>').ok_or(DocumentError::UnexpectedEof)?;
        let inner = &rest[1..end];
        self.pos += end + 1;

        if let Some(name) = inner.strip_prefix('/') {
            return Ok(Tag {
                name: name.trim(),
                kind: TagKind::Close,
                attributes: "",
            });
        }

        let (body, kind) = match inner.strip_suffix('/') {
            Some(body) => (body, TagKind::Empty),
            None => (inner, TagKind::Open),
        };
        let body = body.trim_start();
        let name_end = body.find(char::is_whitespace).unwrap_or(body.len());
        Ok(Tag {
            name: &body[..name_end],
            kind,
            attributes: &body[name_end..],
        })
    }

    fn expect_close(&mut self, name: &str) -> Result<(), DocumentError> {
        let tag = self.next_tag()?;
        if tag.kind == TagKind::Close && tag.name == name {
            return Ok(());
        }
        Err(DocumentError::UnexpectedTag {
            expected: format!("</{name}>"),
            found: tag.describe(),
        })
    }

    /// Raw character data up to the next `<`.
    fn text(&mut self) -> Result<String, DocumentError> {
        let rest = self.rest();
        let end = rest.find('<').ok_or(DocumentError::UnexpectedEof)?;
        self.pos += end;
        unescape(&rest[..end])
    }

    /// Parse the value opened by `tag`, which sits inside `depth`
    /// dictionaries.
    fn parse_value(&mut self, tag: &Tag<'a>, depth: usize) -> Result<Value, DocumentError> {
        if tag.name == "reference" && tag.kind != TagKind::Close {
            return self.resolve_reference(tag, depth);
        }

        let value = self.parse_plain_value(tag, depth)?;
        if let Some(id) = tag.attribute("ID") {
            self.ids.insert(id.to_string(), value.clone());
        }
        Ok(value)
    }

    fn resolve_reference(&mut self, tag: &Tag<'a>, depth: usize) -> Result<Value, DocumentError> {
        if tag.kind == TagKind::Open {
            self.expect_close("reference")?;
        }
        let id = tag.attribute("IDREF").unwrap_or("");
        let value = self
            .ids
            .get(id)
            .ok_or_else(|| DocumentError::UnknownReference(id.to_string()))?;

        if depth + nesting_depth(value) > MAX_DEPTH {
            return Err(DocumentError::TooDeep);
        }
        self.referenced += value_count(value);
        if self.referenced > MAX_REFERENCED_VALUES {
            return Err(DocumentError::TooManyReferences);
        }
        Ok(value.clone())
    }

    fn parse_plain_value(&mut self, tag: &Tag<'a>, depth: usize) -> Result<Value, DocumentError> {
        if tag.kind == TagKind::Close {
            return Err(DocumentError::UnexpectedTag {
                expected: "value".to_string(),
                found: tag.describe(),
            });
        }
        let empty = tag.kind == TagKind::Empty;

        match tag.name {
            "dict" if empty => Ok(Value::Dictionary(Dictionary::new())),
            "dict" => self.parse_dictionary(depth + 1).map(Value::Dictionary),
            "true" | "false" => {
                if !empty {
                    self.expect_close(tag.name)?;
                }
                Ok(Value::Boolean(tag.name == "true"))
            }
            "string" if empty => Ok(Value::String(String::new())),
            "string" => {
                let text = self.text()?;
                self.expect_close("string")?;
                Ok(Value::String(text))
            }
            "data" if empty => Ok(Value::Bytes(Vec::new())),
            "data" => {
                let text = self.text()?;
                self.expect_close("data")?;
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                BASE64_STANDARD
                    .decode(compact.as_bytes())
                    .map(Value::Bytes)
                    .map_err(|e| DocumentError::InvalidBase64(e.to_string()))
            }
            "integer" if empty => Err(DocumentError::InvalidInteger(String::new())),
            "integer" => {
                let text = self.text()?;
                self.expect_close("integer")?;
                parse_integer(text.trim()).map(Value::Integer)
            }
            other => Err(DocumentError::UnsupportedTag(other.to_string())),
        }
    }

    fn parse_dictionary(&mut self, depth: usize) -> Result<Dictionary, DocumentError> {
        if depth > MAX_DEPTH {
            return Err(DocumentError::TooDeep);
        }
        let mut entries = Vec::new();
        loop {
            let tag = self.next_tag()?;
            match (tag.kind, tag.name) {
                (TagKind::Close, "dict") => return Ok(entries.into_iter().collect()),
                (TagKind::Empty, "key") => {
                    let value_tag = self.next_tag()?;
                    let value = self.parse_value(&value_tag, depth)?;
                    entries.push((String::new(), value));
                }
                (TagKind::Open, "key") => {
                    let key = self.text()?;
                    self.expect_close("key")?;
                    let value_tag = self.next_tag()?;
                    let value = self.parse_value(&value_tag, depth)?;
                    entries.push((key, value));
                }
                _ => {
                    return Err(DocumentError::UnexpectedTag {
                        expected: "<key> or </dict>".to_string(),
                        found: tag.describe(),
                    })
                }
            }
        }
    }
}

/// Number of dictionary levels in `value` (0 for scalars).
fn nesting_depth(value: &Value) -> usize {
    match value {
        Value::Dictionary(dict) => {
            1 + dict
                .iter()
                .map(|(_, v)| nesting_depth(v))
                .max()
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn value_count(value: &Value) -> usize {
    match value {
        Value::Dictionary(dict) => 1 + dict.iter().map(|(_, v)| value_count(v)).sum::<usize>(),
        _ => 1,
    }
}

/// Parse a 32-bit integer. Decimal or `0x` hex; values in the unsigned
/// 32-bit range wrap to their signed representation.
fn parse_integer(text: &str) -> Result<i32, DocumentError> {
    let invalid = || DocumentError::InvalidInteger(text.to_string());

    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        let n = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;
        return Ok(n as i32);
    }

    let n: i64 = text.parse().map_err(|_| invalid())?;
    if let Ok(signed) = i32::try_from(n) {
        return Ok(signed);
    }
    u32::try_from(n).map(|u| u as i32).map_err(|_| invalid())
}

fn unescape(raw: &str) -> Result<String, DocumentError> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| DocumentError::InvalidEntity(after.chars().take(8).collect()))?;
        let entity = &after[..semi];
        let decoded = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => decode_char_ref(entity)?,
        };
        out.push(decoded);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn decode_char_ref(entity: &str) -> Result<char, DocumentError> {
    let invalid = || DocumentError::InvalidEntity(entity.to_string());
    let code = if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).map_err(|_| invalid())?
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().map_err(|_| invalid())?
    } else {
        return Err(invalid());
    };
    char::from_u32(code).ok_or_else(invalid)
}

// ============================================================================
// TESTS
// ============================================================================
