//! Abbreviated XPath subset
//!
//! Enough XPath 1.0 to drive field mappings: location paths with `/`, `//`,
//! `.`, `..`, name tests (`name`, `p:name`, `p:*`, `*`), `@name`, `@*`,
//! `text()`, and predicates `[n]`, `[@a]`, `[@a='v']`, `[child]`,
//! `[child='v']`. Attribute and `text()` steps may only appear last.
//!
//! Name tests follow XPath namespace rules: an unprefixed name matches
//! elements in no namespace, prefixes are resolved through the bindings
//! given at compile time, and elements are matched by expanded name.

use crate::tree::{declared_prefix, split_qname, XmlElement, XmlNode, XML_NAMESPACE};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Errors raised while compiling an expression
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XPathError {
    /// Blank expression
    #[error("empty xpath expression")]
    Empty,

    /// Expression is outside the supported grammar
    #[error("invalid xpath '{expr}' at {position}: {message}")]
    Syntax {
        expr: String,
        position: usize,
        message: String,
    },

    /// Prefix with no namespace binding
    #[error("unbound namespace prefix '{prefix}' in xpath '{expr}'")]
    UnboundPrefix { expr: String, prefix: String },
}

/// Node selected by an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selected<'d> {
    /// The document node (selected by `/`); carries the root element
    Document(&'d XmlElement),
    /// An element
    Element(&'d XmlElement),
    /// An attribute
    Attribute {
        /// Qualified attribute name
        name: &'d str,
        /// Attribute value
        value: &'d str,
    },
    /// A text node
    Text(&'d str),
}

impl<'d> Selected<'d> {
    /// XPath string value of the node
    #[must_use]
    pub fn string_value(&self) -> String {
        match self {
            Self::Document(element) | Self::Element(element) => element.text_content(),
            Self::Attribute { value, .. } => (*value).to_string(),
            Self::Text(text) => (*text).to_string(),
        }
    }

    /// The element for element and document nodes
    #[must_use]
    pub fn as_element(&self) -> Option<&'d XmlElement> {
        match self {
            Self::Document(element) | Self::Element(element) => Some(*element),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    AnyIn(String),
    Name { uri: Option<String>, local: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    HasAttribute(NameTest),
    AttributeEquals(NameTest, String),
    HasChild(NameTest),
    ChildEquals(NameTest, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Child {
        test: NameTest,
        predicates: Vec<Predicate>,
    },
    DescendantOrSelf,
    SelfNode,
    Parent,
    Attribute(NameTest),
    Text,
}

/// A compiled expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    source: String,
    absolute: bool,
    steps: Vec<Step>,
}

impl Display for XPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl XPath {
    /// Compile `expr`, resolving prefixes through `namespaces`
    /// (prefix to namespace URI). The `xml` prefix is always bound.
    ///
    /// # Errors
    /// Returns [`XPathError`] for syntax outside the supported subset or
    /// an unbound prefix.
    pub fn compile(expr: &str, namespaces: &BTreeMap<String, String>) -> Result<Self, XPathError> {
        if expr.trim().is_empty() {
            return Err(XPathError::Empty);
        }
        let tokens = tokenize(expr)?;
        Parser {
            expr,
            tokens,
            pos: 0,
            namespaces,
        }
        .parse()
    }

    /// Expression source
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate with `root` as both document element and context node.
    /// Results are in document order without duplicates.
    #[must_use]
    pub fn select<'d>(&self, root: &'d XmlElement) -> Vec<Selected<'d>> {
        let arena = Arena::build(root);
        let start = if self.absolute { Arena::DOCUMENT } else { Arena::ROOT };
        let mut context = vec![start];

        for (i, step) in self.steps.iter().enumerate() {
            let last = i + 1 == self.steps.len();
            match step {
                Step::Attribute(test) => {
                    debug_assert!(last);
                    return context
                        .iter()
                        .flat_map(|&n| arena.attributes(n, test))
                        .collect();
                }
                Step::Text => {
                    debug_assert!(last);
                    return context.iter().flat_map(|&n| arena.texts(n)).collect();
                }
                _ => context = arena.apply(step, &context),
            }
        }

        context.into_iter().map(|n| arena.selected(n)).collect()
    }

    /// First selected node in document order
    #[must_use]
    pub fn select_first<'d>(&self, root: &'d XmlElement) -> Option<Selected<'d>> {
        self.select(root).into_iter().next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DotDot,
    At,
    Star,
    Colon,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Eq,
    Name(String),
    Literal(String),
    Number(usize),
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slash => f.write_str("'/'"),
            Self::DoubleSlash => f.write_str("'//'"),
            Self::Dot => f.write_str("'.'"),
            Self::DotDot => f.write_str("'..'"),
            Self::At => f.write_str("'@'"),
            Self::Star => f.write_str("'*'"),
            Self::Colon => f.write_str("':'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Eq => f.write_str("'='"),
            Self::Name(name) => write!(f, "name '{name}'"),
            Self::Literal(value) => write!(f, "literal '{value}'"),
            Self::Number(n) => write!(f, "number {n}"),
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn syntax(expr: &str, position: usize, message: impl Into<String>) -> XPathError {
    XPathError::Syntax {
        expr: expr.to_string(),
        position,
        message: message.into(),
    }
}

fn tokenize(expr: &str) -> Result<Vec<(usize, Token)>, XPathError> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '/' => {
                if chars.next_if(|&(_, n)| n == '/').is_some() {
                    Token::DoubleSlash
                } else {
                    Token::Slash
                }
            }
            '.' => {
                if chars.next_if(|&(_, n)| n == '.').is_some() {
                    Token::DotDot
                } else {
                    Token::Dot
                }
            }
            '@' => Token::At,
            '*' => Token::Star,
            ':' => Token::Colon,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '=' => Token::Eq,
            '\'' | '"' => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, q)) if q == c => break,
                        Some((_, other)) => value.push(other),
                        None => return Err(syntax(expr, at, "unterminated string literal")),
                    }
                }
                Token::Literal(value)
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::from(c);
                while let Some((_, d)) = chars.next_if(|&(_, d)| d.is_ascii_digit()) {
                    digits.push(d);
                }
                let n = digits
                    .parse()
                    .map_err(|_| syntax(expr, at, "number out of range"))?;
                Token::Number(n)
            }
            c if is_name_start(c) => {
                let mut name = String::from(c);
                while let Some((_, d)) = chars.next_if(|&(_, d)| is_name_char(d)) {
                    name.push(d);
                }
                Token::Name(name)
            }
            other => return Err(syntax(expr, at, format!("unexpected character '{other}'"))),
        };
        tokens.push((at, token));
    }
    Ok(tokens)
}

struct Parser<'e> {
    expr: &'e str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
    namespaces: &'e BTreeMap<String, String>,
}

impl Parser<'_> {
    fn parse(mut self) -> Result<XPath, XPathError> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                true
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(Step::DescendantOrSelf);
                true
            }
            _ => false,
        };

        // A lone "/" selects the document node
        if !(absolute && steps.is_empty() && self.peek().is_none()) {
            loop {
                steps.push(self.step()?);
                match self.advance() {
                    None => break,
                    Some(Token::Slash) => {}
                    Some(Token::DoubleSlash) => steps.push(Step::DescendantOrSelf),
                    Some(other) => return Err(self.unexpected(&other)),
                }
            }
        }

        let terminal = steps
            .iter()
            .position(|s| matches!(s, Step::Attribute(_) | Step::Text));
        if let Some(i) = terminal {
            if i + 1 != steps.len() {
                return Err(syntax(
                    self.expr,
                    0,
                    "attribute and text() steps must come last",
                ));
            }
        }

        Ok(XPath {
            source: self.expr.to_string(),
            absolute,
            steps,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map_or(self.expr.len(), |(at, _)| *at)
    }

    fn unexpected(&self, token: &Token) -> XPathError {
        syntax(self.expr, self.position(), format!("unexpected {token}"))
    }

    fn end(&self) -> XPathError {
        syntax(self.expr, self.expr.len(), "unexpected end of expression")
    }

    fn expect(&mut self, wanted: &Token) -> Result<(), XPathError> {
        match self.advance() {
            Some(ref t) if t == wanted => Ok(()),
            Some(other) => Err(self.unexpected(&other)),
            None => Err(self.end()),
        }
    }

    fn step(&mut self) -> Result<Step, XPathError> {
        match self.advance() {
            Some(Token::Dot) => Ok(Step::SelfNode),
            Some(Token::DotDot) => Ok(Step::Parent),
            Some(Token::At) => {
                let first = self.advance().ok_or_else(|| self.end())?;
                Ok(Step::Attribute(self.name_test(first)?))
            }
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) => {
                if name == "text" {
                    self.expect(&Token::LParen)?;
                    self.expect(&Token::RParen)?;
                    Ok(Step::Text)
                } else {
                    Err(syntax(
                        self.expr,
                        self.position(),
                        format!("function {name}() is not supported"),
                    ))
                }
            }
            Some(first @ (Token::Name(_) | Token::Star)) => {
                let test = self.name_test(first)?;
                let mut predicates = Vec::new();
                while self.peek() == Some(&Token::LBracket) {
                    self.pos += 1;
                    predicates.push(self.predicate()?);
                    self.expect(&Token::RBracket)?;
                }
                Ok(Step::Child { test, predicates })
            }
            Some(other) => Err(self.unexpected(&other)),
            None => Err(self.end()),
        }
    }

    fn name_test(&mut self, first: Token) -> Result<NameTest, XPathError> {
        match first {
            Token::Star => Ok(NameTest::Any),
            Token::Name(name) => {
                if self.peek() != Some(&Token::Colon) {
                    return Ok(NameTest::Name {
                        uri: None,
                        local: name,
                    });
                }
                self.pos += 1;
                let uri = self.resolve(&name)?;
                match self.advance() {
                    Some(Token::Star) => Ok(NameTest::AnyIn(uri)),
                    Some(Token::Name(local)) => Ok(NameTest::Name {
                        uri: Some(uri),
                        local,
                    }),
                    Some(Token::Colon) => Err(syntax(
                        self.expr,
                        self.position(),
                        "axis specifiers are not supported",
                    )),
                    Some(other) => Err(self.unexpected(&other)),
                    None => Err(self.end()),
                }
            }
            other => Err(self.unexpected(&other)),
        }
    }

    fn resolve(&self, prefix: &str) -> Result<String, XPathError> {
        if prefix == "xml" {
            return Ok(XML_NAMESPACE.to_string());
        }
        self.namespaces
            .get(prefix)
            .cloned()
            .ok_or_else(|| XPathError::UnboundPrefix {
                expr: self.expr.to_string(),
                prefix: prefix.to_string(),
            })
    }

    fn predicate(&mut self) -> Result<Predicate, XPathError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Predicate::Position(n)),
            Some(Token::At) => {
                let first = self.advance().ok_or_else(|| self.end())?;
                let test = self.name_test(first)?;
                Ok(match self.literal_comparison()? {
                    Some(value) => Predicate::AttributeEquals(test, value),
                    None => Predicate::HasAttribute(test),
                })
            }
            Some(first @ (Token::Name(_) | Token::Star)) => {
                if self.peek() == Some(&Token::LParen) {
                    return Err(syntax(
                        self.expr,
                        self.position(),
                        "function calls are not supported",
                    ));
                }
                let test = self.name_test(first)?;
                Ok(match self.literal_comparison()? {
                    Some(value) => Predicate::ChildEquals(test, value),
                    None => Predicate::HasChild(test),
                })
            }
            Some(other) => Err(self.unexpected(&other)),
            None => Err(self.end()),
        }
    }

    fn literal_comparison(&mut self) -> Result<Option<String>, XPathError> {
        if self.peek() != Some(&Token::Eq) {
            return Ok(None);
        }
        self.pos += 1;
        match self.advance() {
            Some(Token::Literal(value)) => Ok(Some(value)),
            Some(other) => Err(self.unexpected(&other)),
            None => Err(self.end()),
        }
    }
}

struct ArenaNode<'d> {
    element: Option<&'d XmlElement>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Pre-order node table; index order is document order
struct Arena<'d> {
    root: &'d XmlElement,
    nodes: Vec<ArenaNode<'d>>,
}

impl<'d> Arena<'d> {
    const DOCUMENT: usize = 0;
    const ROOT: usize = 1;

    fn build(root: &'d XmlElement) -> Self {
        let mut arena = Self {
            root,
            nodes: vec![ArenaNode {
                element: None,
                parent: None,
                children: vec![Self::ROOT],
            }],
        };
        arena.push(root, Self::DOCUMENT);
        arena
    }

    fn push(&mut self, element: &'d XmlElement, parent: usize) -> usize {
        let index = self.nodes.len();
        self.nodes.push(ArenaNode {
            element: Some(element),
            parent: Some(parent),
            children: Vec::new(),
        });
        for child in element.child_elements() {
            let c = self.push(child, index);
            self.nodes[index].children.push(c);
        }
        index
    }

    fn selected(&self, n: usize) -> Selected<'d> {
        match self.nodes[n].element {
            Some(element) => Selected::Element(element),
            None => Selected::Document(self.root),
        }
    }

    fn apply(&self, step: &Step, context: &[usize]) -> Vec<usize> {
        let mut out: Vec<usize> = match step {
            Step::DescendantOrSelf => {
                let mut acc = Vec::new();
                for &n in context {
                    self.descendants_or_self(n, &mut acc);
                }
                acc
            }
            Step::SelfNode => context.to_vec(),
            Step::Parent => context
                .iter()
                .filter_map(|&n| self.nodes[n].parent)
                .collect(),
            Step::Child { test, predicates } => context
                .iter()
                .flat_map(|&n| self.children(n, test, predicates))
                .collect(),
            Step::Attribute(_) | Step::Text => Vec::new(),
        };
        out.sort_unstable();
        out.dedup();
        out
    }

    fn descendants_or_self(&self, n: usize, acc: &mut Vec<usize>) {
        acc.push(n);
        for &c in &self.nodes[n].children {
            self.descendants_or_self(c, acc);
        }
    }

    fn children(&self, n: usize, test: &NameTest, predicates: &[Predicate]) -> Vec<usize> {
        let mut selected: Vec<usize> = self.nodes[n]
            .children
            .iter()
            .copied()
            .filter(|&c| self.element_matches(c, test))
            .collect();

        for predicate in predicates {
            selected = match predicate {
                Predicate::Position(p) => p
                    .checked_sub(1)
                    .and_then(|i| selected.get(i).copied())
                    .into_iter()
                    .collect(),
                _ => selected
                    .into_iter()
                    .filter(|&c| self.holds(c, predicate))
                    .collect(),
            };
        }
        selected
    }

    fn holds(&self, n: usize, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Position(_) => true,
            Predicate::HasAttribute(test) => !self.attributes(n, test).is_empty(),
            Predicate::AttributeEquals(test, value) => self
                .attributes(n, test)
                .iter()
                .any(|a| matches!(a, Selected::Attribute { value: v, .. } if *v == value.as_str())),
            Predicate::HasChild(test) => self.nodes[n]
                .children
                .iter()
                .any(|&c| self.element_matches(c, test)),
            Predicate::ChildEquals(test, value) => self.nodes[n]
                .children
                .iter()
                .filter(|&&c| self.element_matches(c, test))
                .filter_map(|&c| self.nodes[c].element)
                .any(|e| e.text_content() == *value),
        }
    }

    fn attributes(&self, n: usize, test: &NameTest) -> Vec<Selected<'d>> {
        let Some(element) = self.nodes[n].element else {
            return Vec::new();
        };
        element
            .attributes
            .iter()
            .filter(|(name, _)| declared_prefix(name).is_none())
            .filter(|(name, _)| {
                let (prefix, local) = split_qname(name);
                let uri = prefix.and_then(|p| self.namespace_of(n, p));
                test_matches(test, uri, local)
            })
            .map(|(name, value)| Selected::Attribute {
                name: name.as_str(),
                value: value.as_str(),
            })
            .collect()
    }

    fn texts(&self, n: usize) -> Vec<Selected<'d>> {
        let Some(element) = self.nodes[n].element else {
            return Vec::new();
        };
        element
            .children
            .iter()
            .filter_map(|child| match child {
                XmlNode::Text(text) => Some(Selected::Text(text.as_str())),
                _ => None,
            })
            .collect()
    }

    fn element_matches(&self, n: usize, test: &NameTest) -> bool {
        let Some(element) = self.nodes[n].element else {
            return false;
        };
        let (prefix, local) = split_qname(&element.name);
        let uri = self.namespace_of(n, prefix.unwrap_or(""));
        test_matches(test, uri, local)
    }

    /// Namespace bound to `prefix` ("" for the default) in scope at `n`
    fn namespace_of(&self, n: usize, prefix: &str) -> Option<&'d str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        let attribute = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{prefix}")
        };
        let mut current = Some(n);
        while let Some(i) = current {
            if let Some(uri) = self.nodes[i].element.and_then(|e| e.attributes.get(&attribute)) {
                return (!uri.is_empty()).then_some(uri.as_str());
            }
            current = self.nodes[i].parent;
        }
        None
    }
}

fn test_matches(test: &NameTest, uri: Option<&str>, local: &str) -> bool {
    match test {
        NameTest::Any => true,
        NameTest::AnyIn(wanted) => uri == Some(wanted.as_str()),
        NameTest::Name {
            uri: wanted,
            local: name,
        } => name == local && wanted.as_deref() == uri,
    }
}
