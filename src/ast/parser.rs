use super::{Node, Primitive, Span};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self { message: message.into(), offset }
    }
}

/// Deepest list or vector nesting accepted by default.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Parse every top-level form of `source`.
///
/// An empty (or comment-only) source yields an empty vector.
pub fn parse_fragment(source: &str) -> Result<Vec<Node>, ParseError> {
    parse_fragment_with_depth(source, DEFAULT_MAX_DEPTH)
}

/// Like `parse_fragment`, but containers nested deeper than `max_depth`
/// are an error at the offset of the first one past the limit.
pub fn parse_fragment_with_depth(source: &str, max_depth: usize) -> Result<Vec<Node>, ParseError> {
    AstParser::new(source).with_max_depth(max_depth).parse_all()
}

pub struct AstParser<'a> {
    input: &'a str,
    offset: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> AstParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn parse_all(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            self.skip_trivia();
            if self.at_end() {
                return Ok(nodes);
            }
            nodes.push(self.parse_node()?);
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn at_end(&self) -> bool {
        self.offset >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.offset).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() || c == b',' {
                self.offset += 1;
            } else if c == b';' {
                while let Some(c) = self.peek() {
                    if c == b'\n' {
                        break;
                    }
                    self.offset += 1;
                }
            } else {
                break;
            }
        }
    }

    fn parse_node(&mut self) -> Result<Node, ParseError> {
        let start = self.offset;
        match self.peek() {
            Some(b'(') => {
                self.offset += 1;
                let root = self.parse_container(b')', start)?;
                Ok(Node::List {
                    root,
                    span: Span::new(start, self.offset - start),
                })
            }
            Some(b'[') => {
                self.offset += 1;
                let root = self.parse_container(b']', start)?;
                Ok(Node::Vector {
                    root,
                    span: Span::new(start, self.offset - start),
                })
            }
            Some(b')') => Err(ParseError::new("Unexpected closing parenthesis", start)),
            Some(b']') => Err(ParseError::new("Unexpected closing bracket", start)),
            Some(b'"') => {
                self.offset += 1;
                self.parse_string_literal(start)
            }
            Some(_) => self.parse_atom(start),
            None => Err(ParseError::new("Unexpected end of input", start)),
        }
    }

    fn parse_container(&mut self, close: u8, start: usize) -> Result<Vec<Node>, ParseError> {
        if self.depth >= self.max_depth {
            return Err(ParseError::new(format!("Nesting deeper than {} levels", self.max_depth), start));
        }
        self.depth += 1;

        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(ParseError::new("Unclosed container", start)),
                Some(c) if c == close => {
                    self.offset += 1;
                    self.depth -= 1;
                    return Ok(items);
                }
                Some(_) => items.push(self.parse_node()?),
            }
        }
    }

    fn parse_string_literal(&mut self, start: usize) -> Result<Node, ParseError> {
        let mut buffer = String::new();
        let mut escape = false;

        // Delimiters are ASCII, so every slice boundary below is a char boundary.
        let mut chunk_start = self.offset;
        while let Some(c) = self.peek() {
            if escape {
                match c {
                    b'n' => buffer.push('\n'),
                    b't' => buffer.push('\t'),
                    b'r' => buffer.push('\r'),
                    b'"' => buffer.push('"'),
                    b'\\' => buffer.push('\\'),
                    _ => return Err(ParseError::new("Unknown escape sequence", self.offset - 1)),
                }
                escape = false;
                self.offset += 1;
                chunk_start = self.offset;
            } else if c == b'\\' {
                buffer.push_str(&self.input[chunk_start..self.offset]);
                escape = true;
                self.offset += 1;
            } else if c == b'"' {
                buffer.push_str(&self.input[chunk_start..self.offset]);
                self.offset += 1;
                return Ok(Node::Primitive {
                    value: Primitive::String(buffer),
                    span: Span::new(start, self.offset - start),
                });
            } else {
                self.offset += 1;
            }
        }

        Err(ParseError::new("Unterminated string literal", start))
    }

    fn parse_atom(&mut self, start: usize) -> Result<Node, ParseError> {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() || matches!(c, b'(' | b')' | b'[' | b']' | b'"' | b';' | b',') {
                break;
            }
            self.offset += 1;
        }

        let text = &self.input[start..self.offset];
        let span = Span::new(start, self.offset - start);

        if let Ok(number) = text.parse::<i64>() {
            return Ok(Node::Primitive {
                value: Primitive::Number(number),
                span,
            });
        }
        if looks_numeric(text) {
            return Err(ParseError::new(format!("Integer literal '{}' out of range", text), start));
        }

        Ok(Node::Symbol { value: text.to_string(), span })
    }
}

fn looks_numeric(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &str) -> Node {
        let mut nodes = parse_fragment(input).unwrap();
        assert_eq!(nodes.len(), 1, "expected a single form in {:?}", input);
        nodes.remove(0)
    }

    /// Strip spans so structural comparisons stay readable
    fn bare(node: &Node) -> Node {
        match node {
            Node::List { root, .. } => Node::new_list_from_raw(root.iter().map(bare).collect()),
            Node::Vector { root, .. } => Node::new_vector_from_raw(root.iter().map(bare).collect()),
            Node::Primitive { value, .. } => Node::Primitive {
                value: value.clone(),
                span: Span::default(),
            },
            Node::Symbol { value, .. } => Node::new_symbol(value),
        }
    }

    #[test]
    fn parse_nested_expression() {
        let parsed = parse_one("(+ 2 (* 3 4))");
        assert_eq!(
            bare(&parsed),
            Node::new_list_from_raw(vec![
                Node::new_symbol("+"),
                Node::new_number(2),
                Node::new_list_from_raw(vec![Node::new_symbol("*"), Node::new_number(3), Node::new_number(4)])
            ])
        );
    }

    #[test]
    fn parse_records_spans() {
        let parsed = parse_one("(+ abc 2)");
        assert_eq!(parsed.span(), Span::new(0, 9));
        if let Node::List { root, .. } = parsed {
            assert_eq!(root[1].span(), Span::new(3, 3));
            assert_eq!(root[2].span(), Span::new(7, 1));
        } else {
            panic!("expected list");
        }
    }

    #[test]
    fn parse_single_number() {
        assert_eq!(bare(&parse_one("42")), Node::new_number(42));
        assert_eq!(bare(&parse_one("-7")), Node::new_number(-7));
    }

    #[test]
    fn parse_single_symbol() {
        assert_eq!(bare(&parse_one("hello")), Node::new_symbol("hello"));
        assert_eq!(bare(&parse_one("-")), Node::new_symbol("-"));
    }

    #[test]
    fn parse_empty_list() {
        assert_eq!(bare(&parse_one("()")), Node::new_list_from_raw(vec![]));
    }

    #[test]
    fn parse_vector() {
        assert_eq!(
            bare(&parse_one("[x 1]")),
            Node::new_vector_from_raw(vec![Node::new_symbol("x"), Node::new_number(1)])
        );
    }

    #[test]
    fn parse_multiple_expressions() {
        let nodes = parse_fragment("(+ 1 2) (- 5 3)").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].span(), Span::new(8, 7));
    }

    #[test]
    fn parse_empty_input() {
        assert_eq!(parse_fragment("").unwrap(), vec![]);
        assert_eq!(parse_fragment("  ; only a comment\n").unwrap(), vec![]);
    }

    #[test]
    fn parse_string_with_escapes() {
        assert_eq!(bare(&parse_one(r#""a\"b\n""#)), Node::new_string("a\"b\n"));
        assert_eq!(bare(&parse_one("\"héllo\"")), Node::new_string("héllo"));
    }

    #[test]
    fn parse_unclosed_parenthesis() {
        let error = parse_fragment("(+ 1 2").unwrap_err();
        assert_eq!(error.offset, 0);
        assert!(error.message.contains("Unclosed"));
    }

    #[test]
    fn parse_unexpected_closer() {
        let error = parse_fragment("(+ 1 2]").unwrap_err();
        assert_eq!(error.offset, 6);
    }

    #[test]
    fn parse_unterminated_string() {
        assert!(parse_fragment("\"abc").is_err());
    }

    #[test]
    fn parse_out_of_range_integer() {
        let error = parse_fragment("99999999999999999999").unwrap_err();
        assert!(error.message.contains("out of range"));
    }

    #[test]
    fn parse_nesting_limit() {
        let nested = |depth: usize| format!("{}1{}", "(- ".repeat(depth), ")".repeat(depth));
        assert_eq!(parse_fragment_with_depth(&nested(4), 4).unwrap()[0].depth(), 4);

        let error = parse_fragment_with_depth(&nested(5), 4).unwrap_err();
        assert_eq!(error.offset, 12);
        assert!(error.message.contains("Nesting deeper than 4"));

        // Far past the default limit the parser stops early instead of recursing.
        assert!(parse_fragment(&nested(100_000)).is_err());
    }

    #[test]
    fn parse_symbol_with_dots() {
        assert_eq!(
            bare(&parse_one("(+ 1.2.3 4)")),
            Node::new_list_from_raw(vec![Node::new_symbol("+"), Node::new_symbol("1.2.3"), Node::new_number(4)])
        );
    }
}
