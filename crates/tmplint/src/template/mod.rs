//! structural template parser
//!
//! Turns template source into a [Root] tree. Parsing never fails as a whole: problems are
//! collected as [SyntaxError]s and the parser resynchronizes at the next action, so the rest
//! of the file is still available for analysis.
mod ast;
mod parse;
mod scan;

pub use ast::*;

/// Left and right action delimiters
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Delimiters {
    pub left: String,
    pub right: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new("{{", "}}")
    }
}

impl Delimiters {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SyntaxError {
    pub message: String,
    pub location: Location,
}

#[derive(Debug, Default)]
pub struct Parsed {
    pub root: Root,
    pub errors: Vec<SyntaxError>,
}

pub fn parse(text: &str, delimiters: &Delimiters) -> Parsed {
    parse::Parser::new(text, delimiters).parse()
}
