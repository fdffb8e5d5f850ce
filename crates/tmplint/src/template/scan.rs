//! splitting source text into text runs and actions, and tokenizing actions
use super::ast::Location;
use super::Delimiters;

/// Maps byte offsets to line/column
#[derive(Debug)]
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self { starts }
    }

    pub fn location(&self, text: &str, offset: usize) -> Location {
        let line = self.starts.partition_point(|start| *start <= offset);
        let start = self.starts[line - 1];
        let column = text
            .get(start..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or_default();
        Location {
            line,
            column: column + 1,
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Item {
    Text { text: String, offset: usize },
    /// `offset` points at the left delimiter, `body_offset` at the first byte of `body`
    Action {
        body: String,
        body_offset: usize,
        offset: usize,
    },
    Comment { offset: usize },
}

/// Split `text` at the delimiters
///
/// An action that is never closed is reported and the remainder of the file becomes text.
pub(crate) fn scan(
    text: &str,
    delimiters: &Delimiters,
    errors: &mut Vec<(String, usize)>,
) -> Vec<Item> {
    let (left, right) = (delimiters.left.as_str(), delimiters.right.as_str());
    let mut items = vec![];
    let mut pos = 0;
    let mut trim_next = false;

    while pos < text.len() {
        let Some(found) = text[pos..].find(left) else {
            push_text(&mut items, &text[pos..], pos, trim_next, false);
            break;
        };

        let start = pos + found;
        let mut inner = start + left.len();
        let trim_left = text[inner..].starts_with('-')
            && text[inner + 1..].starts_with(|c: char| c.is_whitespace());
        push_text(&mut items, &text[pos..start], pos, trim_next, trim_left);
        if trim_left {
            inner += 1;
        }

        let body_start = inner + (text[inner..].len() - text[inner..].trim_start().len());
        if text[body_start..].starts_with("/*") {
            if let Some((close_end, trim_right)) = close_comment(text, body_start, right) {
                items.push(Item::Comment { offset: start });
                trim_next = trim_right;
                pos = close_end;
                continue;
            }
            errors.push(("comment ends before closing delimiter".to_string(), start));
            if let Some((_, close_end, trim_right)) = find_close(text, inner, right) {
                items.push(Item::Comment { offset: start });
                trim_next = trim_right;
                pos = close_end;
                continue;
            }
        }

        match find_close(text, inner, right) {
            Some((body_end, close_end, trim_right)) => {
                items.push(Item::Action {
                    body: text[inner..body_end].to_string(),
                    body_offset: inner,
                    offset: start,
                });
                trim_next = trim_right;
                pos = close_end;
            }
            None => {
                errors.push(("unclosed action".to_string(), start));
                push_text(&mut items, &text[start..], start, false, false);
                break;
            }
        }
    }

    items
}

fn push_text(items: &mut Vec<Item>, text: &str, offset: usize, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        items.push(Item::Text {
            text: text.to_string(),
            offset,
        });
    }
}

/// `/* ... */` must be directly followed by the right delimiter (optionally ` -`)
fn close_comment(text: &str, body_start: usize, right: &str) -> Option<(usize, bool)> {
    let end = body_start + text[body_start..].find("*/")? + 2;
    let rest = &text[end..];
    if rest.starts_with(right) {
        return Some((end + right.len(), false));
    }

    let trimmed = rest.trim_start();
    let skipped = rest.len() - trimmed.len();
    if skipped > 0 && trimmed.starts_with('-') && trimmed[1..].starts_with(right) {
        return Some((end + skipped + 1 + right.len(), true));
    }

    None
}

/// Find the right delimiter outside of quoted strings
///
/// Returns (end of body, end of delimiter, trim marker present)
fn find_close(text: &str, from: usize, right: &str) -> Option<(usize, usize, bool)> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut previous = ' ';
    // characters seen since the opening quote
    let mut quoted = 0;

    for (idx, c) in text[from..].char_indices() {
        let idx = from + idx;
        if quote == Some('\'') && !escaped && c != '\'' && quoted > 0 {
            // a character constant holds one character or one escape; the lexer reports the rest
            quote = None;
        }
        match quote {
            Some(q) => {
                quoted += 1;
                if escaped {
                    escaped = false;
                } else if c == '\\' && q != '`' {
                    escaped = true;
                } else if c == q || (c == '\n' && q != '`') {
                    // a newline ends an interpreted string; the lexer reports it
                    quote = None;
                }
            }
            None => {
                if text[idx..].starts_with(right) {
                    return Some((idx, idx + right.len(), false));
                }
                if c == '-' && previous.is_whitespace() && text[idx + 1..].starts_with(right) {
                    return Some((idx, idx + 1 + right.len(), true));
                }
                if matches!(c, '"' | '`' | '\'') {
                    quote = Some(c);
                    quoted = 0;
                }
            }
        }
        previous = c;
    }

    None
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    /// `.`
    Dot,
    /// `.a.b`
    Field(Vec<String>),
    /// `$`, `$x`, `$x.a.b`
    Variable(String, Vec<String>),
    Ident(String),
    Str(String),
    Number(String),
    Bool(bool),
    Nil,
    LeftParen,
    RightParen,
    Pipe,
    Declare,
    Assign,
    Comma,
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub offset: usize,
    /// filled in by the parser
    pub location: Location,
    /// whitespace precedes the token
    pub spaced: bool,
}

/// Tokenize an action body. `base` is the offset of the body in the file.
pub(crate) fn lex(body: &str, base: usize) -> Result<Vec<Token>, (String, usize)> {
    let chars: Vec<(usize, char)> = body.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    let offset_of = |i: usize| base + chars.get(i).map(|(o, _)| *o).unwrap_or(body.len());

    let mut tokens = vec![];
    let mut i = 0;
    let mut spaced = true;

    while let Some(c) = at(i) {
        if c.is_whitespace() {
            spaced = true;
            i += 1;
            continue;
        }

        let start = i;
        let tok = match c {
            '|' => {
                i += 1;
                Tok::Pipe
            }
            '(' => {
                i += 1;
                Tok::LeftParen
            }
            ')' => {
                i += 1;
                Tok::RightParen
            }
            ',' => {
                i += 1;
                Tok::Comma
            }
            ':' if at(i + 1) == Some('=') => {
                i += 2;
                Tok::Declare
            }
            '=' if at(i + 1) != Some('=') => {
                i += 1;
                Tok::Assign
            }
            '"' => {
                i += 1;
                let mut value = String::new();
                loop {
                    match at(i) {
                        None | Some('\n') => {
                            return Err(("unterminated quoted string".to_string(), offset_of(start)))
                        }
                        Some('"') => break,
                        Some('\\') => {
                            value.push(unescape(at(i + 1)));
                            i += 2;
                        }
                        Some(c) => {
                            value.push(c);
                            i += 1;
                        }
                    }
                }
                i += 1;
                Tok::Str(value)
            }
            '`' => {
                i += 1;
                let mut value = String::new();
                loop {
                    match at(i) {
                        None => {
                            return Err((
                                "unterminated raw quoted string".to_string(),
                                offset_of(start),
                            ))
                        }
                        Some('`') => break,
                        Some(c) => {
                            value.push(c);
                            i += 1;
                        }
                    }
                }
                i += 1;
                Tok::Str(value)
            }
            '\'' => {
                let (value, width) = match (at(i + 1), at(i + 2), at(i + 3)) {
                    (Some('\\'), Some(e), Some('\'')) => (unescape(Some(e)), 4),
                    (Some(c), Some('\''), _) if c != '\\' => (c, 3),
                    _ => {
                        return Err((
                            "malformed character constant".to_string(),
                            offset_of(start),
                        ))
                    }
                };
                i += width;
                Tok::Number((value as u32).to_string())
            }
            '.' if at(i + 1).is_some_and(is_ident_start) => {
                let (steps, next) = field_chain(&chars, i);
                i = next;
                Tok::Field(steps)
            }
            '.' if at(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                i = number_end(&chars, i);
                Tok::Number(slice(&chars, start, i))
            }
            '.' => {
                i += 1;
                Tok::Dot
            }
            '$' => {
                i += 1;
                while at(i).is_some_and(is_ident_char) {
                    i += 1;
                }
                let name = slice(&chars, start, i);
                let (steps, next) = field_chain(&chars, i);
                i = next;
                Tok::Variable(name, steps)
            }
            c if c.is_ascii_digit()
                || (matches!(c, '-' | '+') && at(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                i = number_end(&chars, i + 1);
                Tok::Number(slice(&chars, start, i))
            }
            c if is_ident_start(c) => {
                while at(i).is_some_and(is_ident_char) {
                    i += 1;
                }
                match slice(&chars, start, i).as_str() {
                    "true" => Tok::Bool(true),
                    "false" => Tok::Bool(false),
                    "nil" => Tok::Nil,
                    ident => Tok::Ident(ident.to_string()),
                }
            }
            c => {
                i += 1;
                Tok::Other(c.to_string())
            }
        };

        tokens.push(Token {
            tok,
            offset: offset_of(start),
            location: Location::default(),
            spaced,
        });
        spaced = false;
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn slice(chars: &[(usize, char)], from: usize, to: usize) -> String {
    chars[from..to].iter().map(|(_, c)| c).collect()
}

/// Consume `.a.b.c` starting at a `.`
fn field_chain(chars: &[(usize, char)], mut i: usize) -> (Vec<String>, usize) {
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    let mut steps = vec![];
    while at(i) == Some('.') && at(i + 1).is_some_and(is_ident_start) {
        let start = i + 1;
        i = start;
        while at(i).is_some_and(is_ident_char) {
            i += 1;
        }
        steps.push(slice(chars, start, i));
    }
    (steps, i)
}

fn number_end(chars: &[(usize, char)], mut i: usize) -> usize {
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    while let Some(c) = at(i) {
        let exponent_sign =
            matches!(c, '-' | '+') && matches!(at(i - 1), Some('e' | 'E' | 'p' | 'P'));
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
            i += 1;
        } else {
            break;
        }
    }
    i
}

fn unescape(c: Option<char>) -> char {
    match c {
        Some('n') => '\n',
        Some('t') => '\t',
        Some('r') => '\r',
        Some('0') => '\0',
        Some(c) => c,
        None => '\\',
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn toks(body: &str) -> Vec<Tok> {
        lex(body, 0)
            .expect("must lex")
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn lex_operands() {
        assert_eq!(
            toks(r#".a.b $x.c $ . "s\"q" `raw` 'a' -3 1e-5 true nil fn"#),
            vec![
                Tok::Field(vec!["a".into(), "b".into()]),
                Tok::Variable("$x".into(), vec!["c".into()]),
                Tok::Variable("$".into(), vec![]),
                Tok::Dot,
                Tok::Str("s\"q".into()),
                Tok::Str("raw".into()),
                Tok::Number("97".into()),
                Tok::Number("-3".into()),
                Tok::Number("1e-5".into()),
                Tok::Bool(true),
                Tok::Nil,
                Tok::Ident("fn".into()),
            ]
        );
    }

    #[test]
    fn lex_punctuation() {
        assert_eq!(
            toks("$i, $v := (.x) | f + =="),
            vec![
                Tok::Variable("$i".into(), vec![]),
                Tok::Comma,
                Tok::Variable("$v".into(), vec![]),
                Tok::Declare,
                Tok::LeftParen,
                Tok::Field(vec!["x".into()]),
                Tok::RightParen,
                Tok::Pipe,
                Tok::Ident("f".into()),
                Tok::Other("+".into()),
                Tok::Other("=".into()),
                Tok::Assign,
            ]
        );
    }

    #[test]
    fn unterminated_string() {
        assert_eq!(
            lex(r#"print "abc"#, 10),
            Err(("unterminated quoted string".to_string(), 16))
        );
    }

    #[test]
    fn scan_trims_and_skips_comments() {
        let mut errors = vec![];
        let items = scan(
            "a  {{- /* note */ -}}  b {{ \"}}\" }} c",
            &Delimiters::default(),
            &mut errors,
        );

        assert!(errors.is_empty());
        assert_eq!(
            items,
            vec![
                Item::Text {
                    text: "a".into(),
                    offset: 0
                },
                Item::Comment { offset: 3 },
                Item::Text {
                    text: "b ".into(),
                    offset: 21
                },
                Item::Action {
                    body: " \"}}\" ".into(),
                    body_offset: 27,
                    offset: 25
                },
                Item::Text {
                    text: " c".into(),
                    offset: 35
                },
            ]
        );
    }

    #[test]
    fn scan_unclosed_action() {
        let mut errors = vec![];
        let items = scan("x {{ .a ", &Delimiters::default(), &mut errors);

        assert_eq!(errors, vec![("unclosed action".to_string(), 2)]);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn scan_unterminated_character_constant() {
        let mut errors = vec![];
        let items = scan("{{ 'x }}\n{{ .a }}{{ '}' }}", &Delimiters::default(), &mut errors);

        assert_eq!(errors, vec![]);
        assert_eq!(
            items,
            vec![
                Item::Action {
                    body: " 'x ".to_string(),
                    body_offset: 2,
                    offset: 0,
                },
                Item::Text {
                    text: "\n".to_string(),
                    offset: 8,
                },
                Item::Action {
                    body: " .a ".to_string(),
                    body_offset: 11,
                    offset: 9,
                },
                Item::Action {
                    body: " '}' ".to_string(),
                    body_offset: 19,
                    offset: 17,
                },
            ]
        );
    }

    #[test]
    fn custom_delimiters() {
        let mut errors = vec![];
        let delimiters = Delimiters::new("[[", "]]");
        let items = scan("{{ x }} [[ .y ]]", &delimiters, &mut errors);

        assert!(matches!(&items[1], Item::Action { body, .. } if body == " .y "));
    }

    #[test]
    fn line_index() {
        let text = "ab\ncd\n\nä{{";
        let index = LineIndex::new(text);
        assert_eq!(index.location(text, 0), Location { line: 1, column: 1 });
        assert_eq!(index.location(text, 4), Location { line: 2, column: 2 });
        assert_eq!(index.location(text, 9), Location { line: 4, column: 2 });
    }
}
