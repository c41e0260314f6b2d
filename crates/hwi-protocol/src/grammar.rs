//! Frame grammars.
//!
//! Inbound text has no framing of its own. Each kind of frame the panel can
//! emit is described by a [`FrameGrammar`]: a body pattern with ordered
//! capture fields, plus a terminator class that must follow the body before
//! the frame counts as complete. The terminator is what lets a partially
//! received frame wait for the rest of its digits instead of matching early.
//!
//! ```text
//!   ...prompt;DL, [01:01:00:02:04], 50;RDL...
//!   \________/\______________________/\____/
//!    leading          body             trailing (starts with terminator)
//! ```

use hwi_core::{Error, Result};
use regex::Regex;
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

/// Dim-level change: `DL, [<canonical address>], <level>` followed by a non-digit.
static DIM_LEVEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?P<body>DL\s*,\s*\[([\d:]+)\]\s*,\s*(\d+))\D")
        .expect("dim level pattern is valid")
});

/// Kinds of frame the decoder understands.
///
/// The numeric id is stable and used on the IPC wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FrameKind {
    /// A circuit's dim level changed (keypad press) or was queried (`RDL`).
    DimLevel = 1,
}

impl FrameKind {
    pub const ALL: [FrameKind; 1] = [FrameKind::DimLevel];

    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Look up a kind by wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        FrameKind::from_id(id).ok_or(Error::UnknownFrameType(id))
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameKind::DimLevel => write!(f, "dim-level"),
        }
    }
}

/// A successful grammar match against the decode buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarMatch {
    /// Byte range of the frame body within the searched text
    pub body: Range<usize>,

    /// Capture fields in pattern order
    pub fields: Vec<String>,
}

/// Grammar descriptor: frame kind, compiled pattern and field count.
#[derive(Debug, Clone)]
pub struct FrameGrammar {
    kind: FrameKind,
    pattern: Regex,
    field_count: usize,
}

impl FrameGrammar {
    /// Compile a grammar from a body pattern and a terminator pattern.
    ///
    /// The body may contain any number of capture groups; they become the
    /// frame's fields in order. The terminator must match exactly the text
    /// that has to follow a complete body. It is not consumed.
    ///
    /// # Errors
    /// Returns `Error::InvalidGrammar` if the combined pattern does not compile.
    ///
    /// # Example
    /// ```
    /// use hwi_protocol::{FrameGrammar, FrameKind};
    ///
    /// let grammar = FrameGrammar::new(FrameKind::DimLevel, r"DL,(\d+)", r"\D").unwrap();
    /// assert_eq!(grammar.field_count(), 1);
    /// ```
    pub fn new(kind: FrameKind, body: &str, terminator: &str) -> Result<Self> {
        let pattern = Regex::new(&format!("(?s)(?P<body>{body}){terminator}"))
            .map_err(|e| Error::InvalidGrammar(e.to_string()))?;
        Ok(Self::from_regex(kind, pattern))
    }

    /// The built-in dim-level grammar.
    pub fn dim_level() -> Self {
        Self::from_regex(FrameKind::DimLevel, DIM_LEVEL_PATTERN.clone())
    }

    /// Grammars for every built-in frame kind, in registration order.
    pub fn defaults() -> Vec<Self> {
        vec![Self::dim_level()]
    }

    fn from_regex(kind: FrameKind, pattern: Regex) -> Self {
        // Group 0 is the whole match, group 1 the body.
        let field_count = pattern.captures_len().saturating_sub(2);
        Self {
            kind,
            pattern,
            field_count,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Find the left-most complete frame body in `text`.
    pub fn find(&self, text: &str) -> Option<GrammarMatch> {
        let captures = self.pattern.captures(text)?;
        let body = captures.name("body")?;

        let fields = captures
            .iter()
            .skip(2)
            .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect();

        Some(GrammarMatch {
            body: body.range(),
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_frame_kind_ids() {
        assert_eq!(FrameKind::DimLevel.id(), 1);
        assert_eq!(FrameKind::from_id(1), Some(FrameKind::DimLevel));
        assert_eq!(FrameKind::from_id(9), None);
        assert!(matches!(
            FrameKind::try_from(0),
            Err(Error::UnknownFrameType(0))
        ));
    }

    #[test]
    fn test_dim_level_field_count() {
        assert_eq!(FrameGrammar::dim_level().field_count(), 2);
    }

    #[rstest]
    #[case("DL, [01:01:00:02:04], 50;", "01:01:00:02:04", "50")]
    #[case("DL,[01:02],7 ", "01:02", "7")]
    #[case("L232> DL , [01:01:02:04] , 100;L232>", "01:01:02:04", "100")]
    fn test_dim_level_matches(#[case] text: &str, #[case] address: &str, #[case] level: &str) {
        let m = FrameGrammar::dim_level().find(text).unwrap();
        assert_eq!(m.fields, vec![address.to_string(), level.to_string()]);
        assert!(text[m.body.clone()].starts_with("DL"));
    }

    #[rstest]
    #[case("DL, [01:01:00:02:04], 50")] // terminator not yet received
    #[case("DL, [01:01:00:02:04]")]
    #[case("RDL, [1.1.2.4];")] // echoed command, dotted address
    #[case("")]
    fn test_dim_level_incomplete(#[case] text: &str) {
        assert!(FrameGrammar::dim_level().find(text).is_none());
    }

    #[test]
    fn test_body_excludes_terminator() {
        let text = "DL, [01:02], 50;rest";
        let m = FrameGrammar::dim_level().find(text).unwrap();
        assert_eq!(&text[m.body.clone()], "DL, [01:02], 50");
        assert_eq!(&text[m.body.end..], ";rest");
    }

    #[test]
    fn test_leftmost_match_wins() {
        let text = "DL, [01:02], 10;DL, [01:02], 20;";
        let m = FrameGrammar::dim_level().find(text).unwrap();
        assert_eq!(m.fields[1], "10");
    }

    #[test]
    fn test_custom_grammar() {
        let grammar = FrameGrammar::new(FrameKind::DimLevel, r"LV=(\d+)/(\w+)", ";").unwrap();
        assert_eq!(grammar.field_count(), 2);

        let m = grammar.find("xxLV=3/ab;").unwrap();
        assert_eq!(m.fields, vec!["3".to_string(), "ab".to_string()]);
        assert_eq!(m.body, 2..9);
    }

    #[test]
    fn test_invalid_grammar() {
        let result = FrameGrammar::new(FrameKind::DimLevel, r"(unclosed", ";");
        assert!(matches!(result, Err(Error::InvalidGrammar(_))));
    }
}
