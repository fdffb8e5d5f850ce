use super::ast::*;
use super::scan::{lex, scan, Item, LineIndex, Tok, Token};
use super::{Delimiters, Parsed, SyntaxError};

/// Why [Parser::list] stopped
enum Stop {
    End(Location),
    Else(Else, Location),
    Eof,
}

enum Else {
    Plain,
    If(Option<String>, Pipeline),
    With(Option<String>, Pipeline),
}

pub(crate) struct Parser<'t> {
    text: &'t str,
    lines: LineIndex,
    items: std::vec::IntoIter<Item>,
    errors: Vec<SyntaxError>,
}

impl<'t> Parser<'t> {
    pub fn new(text: &'t str, delimiters: &Delimiters) -> Self {
        let lines = LineIndex::new(text);
        let mut scan_errors = vec![];
        let items = scan(text, delimiters, &mut scan_errors);

        let errors = scan_errors
            .into_iter()
            .map(|(message, offset)| SyntaxError {
                message,
                location: lines.location(text, offset),
            })
            .collect();

        Self {
            text,
            lines,
            items: items.into_iter(),
            errors,
        }
    }

    #[tracing::instrument(level = "trace", skip_all)]
    pub fn parse(mut self) -> Parsed {
        let mut nodes = vec![];
        loop {
            let (mut body, stop) = self.list();
            nodes.append(&mut body);
            match stop {
                Stop::Eof => break,
                // resynchronize: drop the stray action and keep going
                Stop::End(location) => self.error("unexpected `end`", location),
                Stop::Else(_, location) => self.error("unexpected `else`", location),
            }
        }

        self.errors.sort_by_key(|error| error.location);
        Parsed {
            root: Root { nodes },
            errors: self.errors,
        }
    }

    fn location(&self, offset: usize) -> Location {
        self.lines.location(self.text, offset)
    }

    fn error(&mut self, message: impl Into<String>, location: Location) {
        let message = message.into();
        tracing::trace!(%message, %location, "syntax error");
        self.errors.push(SyntaxError { message, location });
    }

    fn unclosed(&mut self, keyword: &str, location: Location) {
        self.error(format!("unclosed `{keyword}`: missing `end`"), location);
    }

    /// Parse nodes until `end`, `else` or the end of input
    fn list(&mut self) -> (Vec<Node>, Stop) {
        let mut nodes = vec![];

        while let Some(item) = self.items.next() {
            match item {
                Item::Text { text, offset } => nodes.push(Node::Text(Text {
                    text,
                    location: self.location(offset),
                })),
                Item::Comment { offset } => nodes.push(Node::Comment(self.location(offset))),
                Item::Action {
                    body,
                    body_offset,
                    offset,
                } => {
                    let location = self.location(offset);
                    let mut tokens = match lex(&body, body_offset) {
                        Ok(tokens) => tokens,
                        Err((message, offset)) => {
                            let location = self.location(offset);
                            self.error(message, location);
                            continue;
                        }
                    };
                    for token in &mut tokens {
                        token.location = self.location(token.offset);
                    }

                    if let Some(stop) = self.action(&tokens, location, &mut nodes) {
                        return (nodes, stop);
                    }
                }
            }
        }

        (nodes, Stop::Eof)
    }

    fn action(&mut self, tokens: &[Token], location: Location, nodes: &mut Vec<Node>) -> Option<Stop> {
        let Some(first) = tokens.first() else {
            self.error("missing value for command", location);
            return None;
        };
        let rest = &tokens[1..];
        let keyword = match &first.tok {
            Tok::Ident(word) => word.as_str(),
            _ => "",
        };

        match keyword {
            "end" => {
                if let Some(token) = rest.first() {
                    self.error("unexpected tokens after `end`", token.location);
                }
                return Some(Stop::End(location));
            }
            "else" => return Some(Stop::Else(self.else_arm(rest, location), location)),
            "if" => {
                let (variable, condition) = self.head(rest, location, "if");
                nodes.push(self.parse_if(variable, condition, location));
            }
            "range" => nodes.push(Node::Range(self.parse_range(rest, location))),
            "with" => {
                let (variable, target) = self.head(rest, location, "with");
                nodes.push(Node::With(self.parse_with(variable, target, location)));
            }
            "define" => {
                let (name, tail) = self.template_name(rest, location, "define");
                if let Some(token) = tail.first() {
                    self.error("unexpected tokens after define name", token.location);
                }
                let body = self.until_end("define", location);
                if let Some(name) = name {
                    nodes.push(Node::Define(Define {
                        name,
                        body,
                        location,
                    }));
                }
            }
            "template" => {
                let (name, tail) = self.template_name(rest, location, "template");
                let data = (!tail.is_empty()).then(|| self.pipeline(tail, location));
                if let Some(name) = name {
                    nodes.push(Node::Include(Include {
                        name,
                        data,
                        location,
                    }));
                }
            }
            "block" => {
                let (name, tail) = self.template_name(rest, location, "block");
                let data = (!tail.is_empty()).then(|| self.pipeline(tail, location));
                let body = self.until_end("block", location);
                if let Some(name) = name {
                    nodes.push(Node::Define(Define {
                        name: name.clone(),
                        body,
                        location,
                    }));
                    nodes.push(Node::Include(Include {
                        name,
                        data,
                        location,
                    }));
                }
            }
            "break" | "continue" => {
                if let Some(token) = rest.first() {
                    self.error(format!("unexpected tokens after `{keyword}`"), token.location);
                }
                nodes.push(match keyword {
                    "break" => Node::Break(location),
                    _ => Node::Continue(location),
                });
            }
            _ => nodes.push(self.plain(tokens, location)),
        }

        None
    }

    /// A pipeline or a variable binding
    fn plain(&mut self, tokens: &[Token], location: Location) -> Node {
        if let [Token {
            tok: Tok::Variable(name, steps),
            ..
        }, Token {
            tok: op @ (Tok::Declare | Tok::Assign),
            ..
        }, rest @ ..] = tokens
        {
            if steps.is_empty() {
                let declare = matches!(op, Tok::Declare);
                let pipeline = if rest.is_empty() {
                    self.error(format!("missing value for `{name}`"), location);
                    malformed(location)
                } else {
                    self.pipeline(rest, location)
                };

                return Node::Bind(Bind {
                    variable: name.clone(),
                    declare,
                    pipeline,
                    location,
                });
            }
        }

        Node::Action(Action {
            pipeline: self.pipeline(tokens, location),
            location,
        })
    }

    /// `[$x :=] pipeline` as used by `if` and `with`
    fn head(
        &mut self,
        tokens: &[Token],
        location: Location,
        keyword: &str,
    ) -> (Option<String>, Pipeline) {
        let (variable, tokens) = match tokens {
            [Token {
                tok: Tok::Variable(name, steps),
                ..
            }, Token {
                tok: Tok::Declare,
                ..
            }, rest @ ..]
                if steps.is_empty() =>
            {
                (Some(name.clone()), rest)
            }
            _ => (None, tokens),
        };

        if tokens.is_empty() {
            self.error(format!("missing value for `{keyword}`"), location);
            return (variable, malformed(location));
        }

        (variable, self.pipeline(tokens, location))
    }

    fn else_arm(&mut self, tokens: &[Token], location: Location) -> Else {
        let Some(first) = tokens.first() else {
            return Else::Plain;
        };

        match &first.tok {
            Tok::Ident(word) if word == "if" => {
                let (variable, condition) = self.head(&tokens[1..], location, "else if");
                Else::If(variable, condition)
            }
            Tok::Ident(word) if word == "with" => {
                let (variable, target) = self.head(&tokens[1..], location, "else with");
                Else::With(variable, target)
            }
            tok => {
                self.error(
                    format!("unexpected {} after `else`", describe(tok)),
                    first.location,
                );
                Else::Plain
            }
        }
    }

    fn parse_if(&mut self, variable: Option<String>, condition: Pipeline, location: Location) -> Node {
        let mut branches = vec![];
        let mut otherwise = None;
        let mut head = (variable, condition, location);

        loop {
            let (body, stop) = self.list();
            let (variable, condition, branch_location) = head;
            branches.push(Branch {
                variable,
                condition,
                body,
                location: branch_location,
            });

            match stop {
                Stop::End(_) => break,
                Stop::Else(Else::If(variable, condition), else_location) => {
                    head = (variable, condition, else_location);
                }
                Stop::Else(Else::Plain, _) => {
                    otherwise = Some(self.until_end("if", location));
                    break;
                }
                Stop::Else(Else::With(..), else_location) => {
                    self.error("unexpected `else with` in `if`", else_location);
                    otherwise = Some(self.until_end("if", location));
                    break;
                }
                Stop::Eof => {
                    self.unclosed("if", location);
                    break;
                }
            }
        }

        Node::If(If {
            branches,
            otherwise,
            location,
        })
    }

    fn parse_range(&mut self, tokens: &[Token], location: Location) -> Range {
        let (key, value, tokens) = match tokens {
            [Token {
                tok: Tok::Variable(key, key_steps),
                ..
            }, Token {
                tok: Tok::Comma, ..
            }, Token {
                tok: Tok::Variable(value, value_steps),
                ..
            }, Token {
                tok: Tok::Declare,
                ..
            }, rest @ ..]
                if key_steps.is_empty() && value_steps.is_empty() =>
            {
                (Some(key.clone()), Some(value.clone()), rest)
            }
            [Token {
                tok: Tok::Variable(value, steps),
                ..
            }, Token {
                tok: Tok::Declare,
                ..
            }, rest @ ..]
                if steps.is_empty() =>
            {
                (None, Some(value.clone()), rest)
            }
            _ => (None, None, tokens),
        };

        let source = if tokens.is_empty() {
            self.error("missing value for `range`", location);
            malformed(location)
        } else {
            self.pipeline(tokens, location)
        };

        let (body, stop) = self.list();
        let otherwise = match stop {
            Stop::End(_) => None,
            Stop::Else(Else::Plain, _) => Some(self.until_end("range", location)),
            Stop::Else(_, else_location) => {
                self.error("unexpected `else if` or `else with` in `range`", else_location);
                Some(self.until_end("range", location))
            }
            Stop::Eof => {
                self.unclosed("range", location);
                None
            }
        };

        Range {
            key,
            value,
            source,
            body,
            otherwise,
            location,
        }
    }

    fn parse_with(&mut self, variable: Option<String>, target: Pipeline, location: Location) -> With {
        let (body, stop) = self.list();
        let otherwise = match stop {
            Stop::End(_) => None,
            Stop::Else(Else::Plain, _) => Some(self.until_end("with", location)),
            // `else with` shares the `end` of the outer `with`
            Stop::Else(Else::With(variable, target), else_location) => Some(vec![Node::With(
                self.parse_with(variable, target, else_location),
            )]),
            Stop::Else(Else::If(..), else_location) => {
                self.error("unexpected `else if` in `with`", else_location);
                Some(self.until_end("with", location))
            }
            Stop::Eof => {
                self.unclosed("with", location);
                None
            }
        };

        With {
            variable,
            target,
            body,
            otherwise,
            location,
        }
    }

    /// Nodes up to the matching `end`; any `else` on the way is an error
    fn until_end(&mut self, keyword: &str, location: Location) -> Vec<Node> {
        let mut nodes = vec![];
        loop {
            let (mut body, stop) = self.list();
            nodes.append(&mut body);
            match stop {
                Stop::End(_) => break,
                Stop::Else(_, else_location) => {
                    self.error(format!("unexpected `else` in `{keyword}`"), else_location)
                }
                Stop::Eof => {
                    self.unclosed(keyword, location);
                    break;
                }
            }
        }
        nodes
    }

    fn template_name<'a>(
        &mut self,
        tokens: &'a [Token],
        location: Location,
        keyword: &str,
    ) -> (Option<String>, &'a [Token]) {
        match tokens.first() {
            Some(Token {
                tok: Tok::Str(name),
                ..
            }) => (Some(name.clone()), &tokens[1..]),
            _ => {
                self.error(format!("`{keyword}` needs a quoted template name"), location);
                (None, tokens.get(1..).unwrap_or_default())
            }
        }
    }

    /// Parse a full pipeline. On failure the error is recorded and an opaque pipeline returned.
    fn pipeline(&mut self, tokens: &[Token], location: Location) -> Pipeline {
        let mut cursor = Cursor { tokens, pos: 0 };
        let result = cursor
            .pipeline(location)
            .and_then(|pipeline| match cursor.peek() {
                None => Ok(pipeline),
                Some(token) => Err(SyntaxError {
                    message: format!("unexpected {} in command", describe(&token.tok)),
                    location: token.location,
                }),
            });

        match result {
            Ok(pipeline) => pipeline,
            Err(error) => {
                tracing::trace!(?error, "malformed pipeline");
                self.errors.push(error);
                malformed(location)
            }
        }
    }
}

fn malformed(location: Location) -> Pipeline {
    Pipeline {
        stages: vec![Expr::Opaque(Opaque {
            text: "malformed".to_string(),
            children: vec![],
            location,
        })],
        location,
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Dot => "`.`".to_string(),
        Tok::Field(steps) => format!("field `.{}`", steps.join(".")),
        Tok::Variable(name, _) => format!("variable `{name}`"),
        Tok::Ident(name) => format!("`{name}`"),
        Tok::Str(_) => "string".to_string(),
        Tok::Number(_) => "number".to_string(),
        Tok::Bool(_) | Tok::Nil => "constant".to_string(),
        Tok::LeftParen => "`(`".to_string(),
        Tok::RightParen => "`)`".to_string(),
        Tok::Pipe => "`|`".to_string(),
        Tok::Declare => "`:=`".to_string(),
        Tok::Assign => "`=`".to_string(),
        Tok::Comma => "`,`".to_string(),
        Tok::Other(text) => format!("`{text}`"),
    }
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn pipeline(&mut self, location: Location) -> Result<Pipeline, SyntaxError> {
        let location = self.peek().map(|t| t.location).unwrap_or(location);
        let mut stages = vec![self.command(location)?];

        while let Some(pipe) = self.peek().filter(|t| t.tok == Tok::Pipe) {
            self.pos += 1;
            stages.push(self.command(pipe.location)?);
        }

        Ok(Pipeline { stages, location })
    }

    /// `f a b`, or a single operand
    fn command(&mut self, location: Location) -> Result<Expr, SyntaxError> {
        let mut operands = vec![];
        while let Some(token) = self.peek() {
            if matches!(token.tok, Tok::Pipe | Tok::RightParen) {
                break;
            }
            operands.push(self.operand()?);
        }

        let mut operands = operands.into_iter();
        let Some(head) = operands.next() else {
            return Err(SyntaxError {
                message: "missing value for command".to_string(),
                location,
            });
        };
        let args: Vec<Expr> = operands.collect();
        if args.is_empty() {
            return Ok(head);
        }

        match head {
            // operands only produce argument-less calls from bare identifiers
            Expr::Call(call) if call.args.is_empty() => Ok(Expr::Call(Call { args, ..call })),
            head => Ok(Expr::Opaque(Opaque {
                text: "command".to_string(),
                location: head.location(),
                children: std::iter::once(head).chain(args).collect(),
            })),
        }
    }

    fn operand(&mut self) -> Result<Expr, SyntaxError> {
        let Some(token) = self.next() else {
            unreachable!("operand is only called after a successful peek");
        };
        let location = token.location;

        let mut expr = match &token.tok {
            Tok::Dot => Expr::Field(FieldPath {
                base: Base::Dot,
                steps: vec![],
                location,
            }),
            Tok::Field(steps) => Expr::Field(FieldPath {
                base: Base::Dot,
                steps: steps.clone(),
                location,
            }),
            Tok::Variable(name, steps) if steps.is_empty() => Expr::Variable(VariableRef {
                name: name.clone(),
                location,
            }),
            Tok::Variable(name, steps) => Expr::Field(FieldPath {
                base: Base::Variable(name.clone()),
                steps: steps.clone(),
                location,
            }),
            Tok::Ident(name) => Expr::Call(Call {
                function: name.clone(),
                args: vec![],
                location,
            }),
            Tok::Str(value) => Expr::Literal(Literal::String(value.clone()), location),
            Tok::Number(value) => Expr::Literal(Literal::Number(value.clone()), location),
            Tok::Bool(value) => Expr::Literal(Literal::Bool(*value), location),
            Tok::Nil => Expr::Literal(Literal::Nil, location),
            Tok::LeftParen => {
                let inner = self.pipeline(location)?;
                match self.next() {
                    Some(Token {
                        tok: Tok::RightParen,
                        ..
                    }) => Expr::Pipeline(Box::new(inner)),
                    _ => {
                        return Err(SyntaxError {
                            message: "unclosed left paren".to_string(),
                            location,
                        })
                    }
                }
            }
            Tok::Other(text) => Expr::Opaque(Opaque {
                text: text.clone(),
                children: vec![],
                location,
            }),
            tok @ (Tok::RightParen | Tok::Pipe | Tok::Declare | Tok::Assign | Tok::Comma) => {
                return Err(SyntaxError {
                    message: format!("unexpected {} in operand", describe(tok)),
                    location,
                })
            }
        };

        // `(pipeline).a` or `fn.a`
        while let Some(Token {
            tok: Tok::Field(steps),
            spaced: false,
            ..
        }) = self.peek()
        {
            self.pos += 1;
            expr = Expr::Field(FieldPath {
                base: Base::Expr(Box::new(expr)),
                steps: steps.clone(),
                location,
            });
        }

        Ok(expr)
    }
}
