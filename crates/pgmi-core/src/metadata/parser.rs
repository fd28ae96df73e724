//! Hand-written parser for the `<pgmi-meta>` identity block.
//!
//! ```text
//! block    := "<pgmi-meta" attr* ( "/>" | ">" item* "</pgmi-meta>" )
//! attr     := name "=" quoted              ; id, idempotent
//! item     := ws | xml-comment | description | sortKeys
//! description := "<description>" text "</description>"
//! sortKeys := "<sortKeys>" ( ws | "<key>" text "</key>" )* "</sortKeys>" | "<sortKeys/>"
//! ```
//!
//! The block must sit inside a `/* ... */` comment.

use thiserror::Error;
use uuid::Uuid;

pub const MAX_BLOCK_SIZE: usize = 10 * 1024;

const OPEN_TAG: &str = "<pgmi-meta";
const CLOSE_TAG: &str = "</pgmi-meta>";
const LEGACY_TAG: &str = "<pgmi:meta";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("legacy <pgmi:meta> block found; rename it to <pgmi-meta>")]
    LegacyFormat,

    #[error("found {0} <pgmi-meta> blocks; a file may declare only one")]
    MultipleBlocks(usize),

    #[error("metadata comment is {0} bytes; the limit is {MAX_BLOCK_SIZE}")]
    TooLarge(usize),

    #[error("unterminated block comment containing <pgmi-meta>")]
    UnterminatedComment,

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("missing required attribute '{0}'")]
    MissingAttribute(&'static str),

    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    #[error("attribute '{0}' given more than once")]
    DuplicateAttribute(String),

    #[error("unknown element <{0}>")]
    UnknownElement(String),

    #[error("element <{0}> given more than once")]
    DuplicateElement(String),

    #[error("id '{0}' is not a valid UUID")]
    InvalidId(String),

    #[error("id must not be the nil UUID")]
    NilId,

    #[error("idempotent must be 'true' or 'false', got '{0}'")]
    InvalidIdempotent(String),

    #[error("description must not be blank when present")]
    BlankDescription,

    #[error("sort key #{0} is empty")]
    EmptySortKey(usize),
}

/// Fields read from a well-formed block, before fallbacks are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMetadata {
    pub id: Uuid,
    pub idempotent: bool,
    pub description: String,
    pub sort_keys: Vec<String>,
}

/// Finds the metadata comment and parses it. `Ok(None)` means there is no block.
pub fn parse_metadata(content: &str) -> Result<Option<RawMetadata>, MetadataError> {
    let comments = block_comments(content)?;

    if comments.iter().any(|c| c.contains(LEGACY_TAG)) {
        return Err(MetadataError::LegacyFormat);
    }

    let total: usize = comments.iter().map(|c| c.matches(OPEN_TAG).count()).sum();
    if total == 0 {
        return Ok(None);
    }
    if total > 1 {
        return Err(MetadataError::MultipleBlocks(total));
    }

    let Some(comment) = comments.iter().find(|c| c.contains(OPEN_TAG)) else {
        return Ok(None);
    };
    if comment.len() > MAX_BLOCK_SIZE {
        return Err(MetadataError::TooLarge(comment.len()));
    }

    let start = comment.find(OPEN_TAG).unwrap_or(0);
    let mut cursor = Cursor::new(&comment[start..]);
    let raw = parse_block(&mut cursor)?;

    cursor.skip_ws();
    if !cursor.at_end() {
        return Err(cursor.syntax("unexpected content after </pgmi-meta>"));
    }
    Ok(Some(raw))
}

/// Bodies of every `/* ... */` comment. Comments do not nest.
fn block_comments(content: &str) -> Result<Vec<&str>, MetadataError> {
    let mut comments = Vec::new();
    let mut rest = content;
    while let Some(open) = rest.find("/*") {
        let body_start = open + 2;
        match rest[body_start..].find("*/") {
            Some(close) => {
                comments.push(&rest[body_start..body_start + close]);
                rest = &rest[body_start + close + 2..];
            }
            None => {
                if rest[body_start..].contains(OPEN_TAG) {
                    return Err(MetadataError::UnterminatedComment);
                }
                break;
            }
        }
    }
    Ok(comments)
}

fn parse_block(cursor: &mut Cursor<'_>) -> Result<RawMetadata, MetadataError> {
    cursor.expect(OPEN_TAG)?;

    let mut id: Option<String> = None;
    let mut idempotent: Option<String> = None;

    loop {
        let had_ws = cursor.skip_ws();
        if cursor.peek("/>") || cursor.peek(">") {
            break;
        }
        if !had_ws {
            return Err(cursor.syntax("expected whitespace before attribute"));
        }
        let name = cursor.name()?;
        cursor.skip_ws();
        cursor.expect("=")?;
        cursor.skip_ws();
        let value = decode_entities(cursor.quoted()?);
        let slot = match name {
            "id" => &mut id,
            "idempotent" => &mut idempotent,
            other => return Err(MetadataError::UnknownAttribute(other.to_string())),
        };
        if slot.is_some() {
            return Err(MetadataError::DuplicateAttribute(name.to_string()));
        }
        *slot = Some(value);
    }

    let mut description: Option<String> = None;
    let mut sort_keys: Option<Vec<String>> = None;

    if !cursor.eat("/>") {
        cursor.expect(">")?;
        loop {
            cursor.skip_ws();
            if cursor.eat(CLOSE_TAG) {
                break;
            }
            if cursor.at_end() {
                return Err(cursor.syntax("missing </pgmi-meta>"));
            }
            if cursor.skip_xml_comment()? {
                continue;
            }
            if !cursor.peek("<") || cursor.peek("</") {
                return Err(cursor.syntax("expected an element"));
            }
            cursor.expect("<")?;
            let name = cursor.name()?;
            cursor.skip_ws();
            let self_closing = cursor.eat("/>");
            if !self_closing {
                cursor.expect(">")?;
            }
            match name {
                "description" => {
                    if description.is_some() {
                        return Err(MetadataError::DuplicateElement(name.to_string()));
                    }
                    let text = if self_closing {
                        String::new()
                    } else {
                        let text = decode_entities(cursor.text()?);
                        cursor.expect("</description>")?;
                        text
                    };
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        return Err(MetadataError::BlankDescription);
                    }
                    description = Some(text);
                }
                "sortKeys" => {
                    if sort_keys.is_some() {
                        return Err(MetadataError::DuplicateElement(name.to_string()));
                    }
                    let keys = if self_closing {
                        Vec::new()
                    } else {
                        parse_sort_keys(cursor)?
                    };
                    sort_keys = Some(keys);
                }
                other => return Err(MetadataError::UnknownElement(other.to_string())),
            }
        }
    }

    let id_text = id.ok_or(MetadataError::MissingAttribute("id"))?;
    let id = Uuid::parse_str(id_text.trim())
        .map_err(|_| MetadataError::InvalidId(id_text.clone()))?;
    if id.is_nil() {
        return Err(MetadataError::NilId);
    }

    let idempotent_text = idempotent.ok_or(MetadataError::MissingAttribute("idempotent"))?;
    let idempotent = match idempotent_text.trim() {
        "true" => true,
        "false" => false,
        other => return Err(MetadataError::InvalidIdempotent(other.to_string())),
    };

    Ok(RawMetadata {
        id,
        idempotent,
        description: description.unwrap_or_default(),
        sort_keys: sort_keys.unwrap_or_default(),
    })
}

fn parse_sort_keys(cursor: &mut Cursor<'_>) -> Result<Vec<String>, MetadataError> {
    let mut keys = Vec::new();
    loop {
        cursor.skip_ws();
        if cursor.eat("</sortKeys>") {
            return Ok(keys);
        }
        if cursor.at_end() {
            return Err(cursor.syntax("missing </sortKeys>"));
        }
        if cursor.skip_xml_comment()? {
            continue;
        }
        cursor.expect("<key")?;
        cursor.skip_ws();
        if cursor.eat("/>") {
            return Err(MetadataError::EmptySortKey(keys.len() + 1));
        }
        cursor.expect(">")?;
        let key = decode_entities(cursor.text()?).trim().to_string();
        cursor.expect("</key>")?;
        if key.is_empty() {
            return Err(MetadataError::EmptySortKey(keys.len() + 1));
        }
        keys.push(key);
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self, token: &str) -> bool {
        self.rest().starts_with(token)
    }

    /// Returns true if any whitespace was consumed.
    fn skip_ws(&mut self) -> bool {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
        rest.len() != trimmed.len()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.peek(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), MetadataError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.syntax(&format!("expected '{}'", token)))
        }
    }

    fn name(&mut self) -> Result<&'a str, MetadataError> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.syntax("expected a name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn quoted(&mut self) -> Result<&'a str, MetadataError> {
        let rest = self.rest();
        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.syntax("expected a quoted value")),
        };
        let body = &rest[1..];
        match body.find(quote) {
            Some(end) => {
                self.pos += end + 2;
                Ok(&body[..end])
            }
            None => Err(self.syntax("unterminated attribute value")),
        }
    }

    /// Character data up to the next `<`.
    fn text(&mut self) -> Result<&'a str, MetadataError> {
        let rest = self.rest();
        match rest.find('<') {
            Some(end) => {
                self.pos += end;
                Ok(&rest[..end])
            }
            None => Err(self.syntax("unterminated element")),
        }
    }

    fn skip_xml_comment(&mut self) -> Result<bool, MetadataError> {
        if !self.eat("<!--") {
            return Ok(false);
        }
        match self.rest().find("-->") {
            Some(end) => {
                self.pos += end + 3;
                Ok(true)
            }
            None => Err(self.syntax("unterminated XML comment")),
        }
    }

    fn syntax(&self, message: &str) -> MetadataError {
        MetadataError::Syntax {
            offset: self.pos,
            message: message.to_string(),
        }
    }
}
