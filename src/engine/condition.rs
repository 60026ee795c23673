//! Guard Condition Language
//!
//! Parser for the installer engine's condition syntax used on sequence rules.
//!
//! ```text
//! expr    := xor
//! xor     := or  ("XOR" or)*
//! or      := and ("OR" and)*
//! and     := not ("AND" not)*
//! not     := "NOT" not | cmp
//! cmp     := operand (op operand)? | "(" expr ")"
//! op      := "~"? ("=" | "<>" | "<" | ">" | "<=" | ">=" | "><" | "<<" | ">>")
//! operand := IDENT | &IDENT | !IDENT | $IDENT | ?IDENT | %IDENT | "string" | INTEGER
//! ```
//!
//! `><`, `<<` and `>>` test for a substring, prefix and suffix. A leading `~`
//! makes the comparison case-insensitive. `%NAME` reads an environment
//! variable of the target machine and is not checked against the manifest.
//!
//! Keywords are case-insensitive. Identifiers are case-sensitive.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::error::CompileError;

/// State variables the installer engine always defines
pub const BUILTIN_VARIABLES: &[&str] = &[
    "Installed",
    "REMOVE",
    "REINSTALL",
    "UPGRADINGPRODUCTCODE",
    "WIX_UPGRADE_DETECTED",
    "WIX_DOWNGRADE_DETECTED",
    "VersionNT",
    "VersionNT64",
    "UILevel",
    "PATCH",
    "ALLUSERS",
    "ProductVersion",
];

// ============================================================================
// Syntax Tree
// ============================================================================

/// Prefix selecting a feature or component state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePrefix {
    /// `&Feature`: action requested for the feature
    FeatureAction,
    /// `!Feature`: installed state of the feature
    FeatureInstalled,
    /// `$Component`: action requested for the component
    ComponentAction,
    /// `?Component`: installed state of the component
    ComponentInstalled,
}

impl StatePrefix {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '&' => Some(Self::FeatureAction),
            '!' => Some(Self::FeatureInstalled),
            '$' => Some(Self::ComponentAction),
            '?' => Some(Self::ComponentInstalled),
            _ => None,
        }
    }

    pub fn targets_feature(self) -> bool {
        matches!(self, Self::FeatureAction | Self::FeatureInstalled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// `><`
    Contains,
    /// `<<`
    StartsWith,
    /// `>>`
    EndsWith,
}

/// Comparison operator with its case mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub op: CompareOp,
    /// Written with a leading `~`
    pub ignore_case: bool,
}

impl Comparison {
    pub fn exact(op: CompareOp) -> Self {
        Self {
            op,
            ignore_case: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Variable(String),
    State(StatePrefix, String),
    /// `%NAME`
    Env(String),
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Operand(Operand),
    Compare(Operand, Comparison, Operand),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Xor(Box<Expr>, Box<Expr>),
}

/// A parsed guard with its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub text: String,
    pub expr: Expr,
}

/// Syntax error in a guard
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl Condition {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(ParseError {
                offset: 0,
                message: "empty condition".to_string(),
            });
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: text.len(),
        };
        let expr = parser.xor()?;
        if let Some((offset, token)) = parser.tokens.get(parser.pos) {
            return Err(ParseError {
                offset: *offset,
                message: format!("unexpected {}", token),
            });
        }
        Ok(Self {
            text: text.trim().to_string(),
            expr,
        })
    }

    /// Every variable and state reference, in source order
    pub fn references(&self) -> Vec<&Operand> {
        fn push<'a>(op: &'a Operand, out: &mut Vec<&'a Operand>) {
            if matches!(op, Operand::Variable(_) | Operand::State(..)) {
                out.push(op);
            }
        }

        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a Operand>) {
            match expr {
                Expr::Operand(op) => push(op, out),
                Expr::Compare(l, _, r) => {
                    push(l, out);
                    push(r, out);
                }
                Expr::Not(inner) => walk(inner, out),
                Expr::And(l, r) | Expr::Or(l, r) | Expr::Xor(l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
            }
        }

        let mut out = Vec::new();
        walk(&self.expr, &mut out);
        out
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Op(Comparison),
    Not,
    And,
    Or,
    Xor,
    Ident(String),
    State(StatePrefix, String),
    Env(String),
    Str(String),
    Int(i64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Op(_) => f.write_str("comparison operator"),
            Self::Not => f.write_str("NOT"),
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
            Self::Xor => f.write_str("XOR"),
            Self::Ident(name) => write!(f, "identifier '{}'", name),
            Self::State(_, name) => write!(f, "state reference '{}'", name),
            Self::Env(name) => write!(f, "environment reference '{}'", name),
            Self::Str(s) => write!(f, "string \"{}\"", s),
            Self::Int(n) => write!(f, "integer {}", n),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Comparison operator starting at `chars[i]`, with its length
fn operator_at(chars: &[(usize, char)], i: usize) -> Option<(CompareOp, usize)> {
    let next = chars.get(i + 1).map(|(_, c)| *c);
    let op = match (chars.get(i).map(|(_, c)| *c)?, next) {
        ('=', _) => (CompareOp::Eq, 1),
        ('<', Some('>')) => (CompareOp::Ne, 2),
        ('<', Some('=')) => (CompareOp::Le, 2),
        ('<', Some('<')) => (CompareOp::StartsWith, 2),
        ('<', _) => (CompareOp::Lt, 1),
        ('>', Some('=')) => (CompareOp::Ge, 2),
        ('>', Some('<')) => (CompareOp::Contains, 2),
        ('>', Some('>')) => (CompareOp::EndsWith, 2),
        ('>', _) => (CompareOp::Gt, 1),
        _ => return None,
    };
    Some(op)
}

/// Identifier starting at `chars[start]`; returns it and the index after it
fn ident_at(chars: &[(usize, char)], start: usize) -> Option<(String, usize)> {
    if !chars.get(start).is_some_and(|(_, c)| is_ident_start(*c)) {
        return None;
    }
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end].1) {
        end += 1;
    }
    Some((chars[start..end].iter().map(|(_, c)| *c).collect(), end))
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let error = |offset: usize, message: &str| ParseError {
        offset,
        message: message.to_string(),
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '(' => {
                tokens.push((offset, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((offset, Token::RParen));
                i += 1;
            }
            '=' | '<' | '>' => {
                let (op, len) =
                    operator_at(&chars, i).ok_or_else(|| error(offset, "bad operator"))?;
                tokens.push((offset, Token::Op(Comparison::exact(op))));
                i += len;
            }
            '~' => {
                let (op, len) = operator_at(&chars, i + 1)
                    .ok_or_else(|| error(offset, "'~' must be followed by a comparison operator"))?;
                tokens.push((
                    offset,
                    Token::Op(Comparison {
                        op,
                        ignore_case: true,
                    }),
                ));
                i += 1 + len;
            }
            '%' => {
                let (name, end) = ident_at(&chars, i + 1)
                    .ok_or_else(|| error(offset, "'%' must be followed by a variable name"))?;
                tokens.push((offset, Token::Env(name)));
                i = end;
            }
            '"' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end].1 != '"' {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(error(offset, "unterminated string"));
                }
                let value: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                tokens.push((offset, Token::Str(value)));
                i = end + 1;
            }
            '&' | '!' | '$' | '?' => {
                let prefix = StatePrefix::from_char(c).ok_or_else(|| error(offset, "bad prefix"))?;
                let (name, end) = ident_at(&chars, i + 1)
                    .ok_or_else(|| error(offset, "state prefix must be followed by an identifier"))?;
                tokens.push((offset, Token::State(prefix, name)));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut end = i + 1;
                while end < chars.len() && chars[end].1.is_ascii_digit() {
                    end += 1;
                }
                let literal: String = chars[i..end].iter().map(|(_, c)| *c).collect();
                let value = literal
                    .parse::<i64>()
                    .map_err(|_| error(offset, "integer out of range"))?;
                tokens.push((offset, Token::Int(value)));
                i = end;
            }
            c if is_ident_start(c) => {
                let mut end = i + 1;
                while end < chars.len() && is_ident_char(chars[end].1) {
                    end += 1;
                }
                let word: String = chars[i..end].iter().map(|(_, c)| *c).collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "NOT" => Token::Not,
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "XOR" => Token::Xor,
                    _ => Token::Ident(word),
                };
                tokens.push((offset, token));
                i = end;
            }
            other => {
                return Err(error(offset, &format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    /// Offset reported for errors at end of input
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn xor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.or()?;
        while self.eat(&Token::Xor) {
            let right = self.or()?;
            left = Expr::Xor(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not()?;
        while self.eat(&Token::And) {
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::LParen) {
            let inner = self.xor()?;
            if !self.eat(&Token::RParen) {
                return Err(self.error("expected ')'"));
            }
            return Ok(inner);
        }

        let left = self.operand()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.operand()?;
            return Ok(Expr::Compare(left, op, right));
        }
        Ok(Expr::Operand(left))
    }

    fn operand(&mut self) -> Result<Operand, ParseError> {
        let operand = match self.peek() {
            Some(Token::Ident(name)) => Operand::Variable(name.clone()),
            Some(Token::State(prefix, name)) => Operand::State(*prefix, name.clone()),
            Some(Token::Env(name)) => Operand::Env(name.clone()),
            Some(Token::Str(s)) => Operand::Str(s.clone()),
            Some(Token::Int(n)) => Operand::Int(*n),
            Some(other) => return Err(self.error(format!("expected a value, found {}", other))),
            None => return Err(self.error("unexpected end of condition")),
        };
        self.pos += 1;
        Ok(operand)
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Names a guard may refer to
#[derive(Debug, Clone, Default)]
pub struct GuardScope {
    /// Built-ins, directory ids and declared properties
    pub variables: HashSet<String>,
    pub features: HashSet<String>,
    pub components: HashSet<String>,
}

impl GuardScope {
    /// Scope seeded with the built-in state variables
    pub fn with_builtins() -> Self {
        Self {
            variables: BUILTIN_VARIABLES.iter().map(|v| v.to_string()).collect(),
            ..Self::default()
        }
    }
}

/// Parse and check the guard of `action`.
///
/// # Errors
///
/// - [`CompileError::MalformedGuard`] on a syntax error
/// - [`CompileError::GuardDependsOnAction`] if the guard names the action
/// - [`CompileError::UnknownGuardVariable`] for any name outside `scope`
pub fn check_guard(action: &str, text: &str, scope: &GuardScope) -> Result<Condition, CompileError> {
    let condition = Condition::parse(text).map_err(|e| CompileError::MalformedGuard {
        action: action.to_string(),
        reason: e.to_string(),
    })?;

    for reference in condition.references() {
        let (name, known) = match reference {
            Operand::Variable(name) => (name, scope.variables.contains(name)),
            Operand::State(prefix, name) if prefix.targets_feature() => {
                (name, scope.features.contains(name))
            }
            Operand::State(_, name) => (name, scope.components.contains(name)),
            Operand::Env(_) | Operand::Str(_) | Operand::Int(_) => continue,
        };
        if name == action {
            return Err(CompileError::GuardDependsOnAction {
                action: action.to_string(),
            });
        }
        if !known {
            return Err(CompileError::UnknownGuardVariable {
                action: action.to_string(),
                variable: name.clone(),
            });
        }
    }

    Ok(condition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Operand(Operand::Variable(name.to_string())))
    }

    fn scope() -> GuardScope {
        let mut scope = GuardScope::with_builtins();
        scope.variables.insert("INSTALLFOLDER".into());
        scope.features.insert("Core".into());
        scope.components.insert("Main".into());
        scope
    }

    // =========================================================================
    // Parser Tests
    // =========================================================================

    #[test]
    fn test_precedence_not_and_or_xor() {
        let c = Condition::parse("A OR B AND NOT C XOR D").unwrap();
        let expected = Expr::Xor(
            Box::new(Expr::Or(
                var("A"),
                Box::new(Expr::And(var("B"), Box::new(Expr::Not(var("C"))))),
            )),
            var("D"),
        );
        assert_eq!(c.expr, expected);
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let upper = Condition::parse("NOT Installed AND REMOVE").unwrap();
        let lower = Condition::parse("not Installed and REMOVE").unwrap();
        assert_eq!(upper.expr, lower.expr);
    }

    #[test]
    fn test_comparisons_and_literals() {
        let c = Condition::parse(r#"REMOVE = "ALL" OR VersionNT >= 601"#).unwrap();
        let Expr::Or(left, right) = c.expr else {
            panic!("expected OR");
        };
        assert_eq!(
            *left,
            Expr::Compare(
                Operand::Variable("REMOVE".into()),
                Comparison::exact(CompareOp::Eq),
                Operand::Str("ALL".into())
            )
        );
        assert_eq!(
            *right,
            Expr::Compare(
                Operand::Variable("VersionNT".into()),
                Comparison::exact(CompareOp::Ge),
                Operand::Int(601)
            )
        );
    }

    #[test]
    fn test_substring_and_case_insensitive_operators() {
        let cases = [
            ("A >< \"x\"", CompareOp::Contains, false),
            ("A << \"x\"", CompareOp::StartsWith, false),
            ("A >> \"x\"", CompareOp::EndsWith, false),
            ("A ~= \"x\"", CompareOp::Eq, true),
            ("A ~<> \"x\"", CompareOp::Ne, true),
            ("A ~>< \"x\"", CompareOp::Contains, true),
            ("A ~<< \"x\"", CompareOp::StartsWith, true),
            ("A~>>\"x\"", CompareOp::EndsWith, true),
        ];
        for (text, op, ignore_case) in cases {
            let c = Condition::parse(text).unwrap();
            let Expr::Compare(_, cmp, _) = c.expr else {
                panic!("expected a comparison for {:?}", text);
            };
            assert_eq!(cmp, Comparison { op, ignore_case }, "{}", text);
        }
    }

    #[test]
    fn test_environment_reference() {
        let c = Condition::parse("%PROCESSOR_ARCHITECTURE ~= \"AMD64\"").unwrap();
        assert_eq!(
            c.expr,
            Expr::Compare(
                Operand::Env("PROCESSOR_ARCHITECTURE".into()),
                Comparison {
                    op: CompareOp::Eq,
                    ignore_case: true
                },
                Operand::Str("AMD64".into())
            )
        );
        assert!(c.references().is_empty());
        assert!(Condition::parse("% = 1").is_err());
        assert!(Condition::parse("A ~ B").is_err());
    }

    #[test]
    fn test_state_prefixes() {
        let c = Condition::parse("&Core = 3 AND NOT ?Main = 3").unwrap();
        let refs: Vec<&Operand> = c.references();
        assert_eq!(refs[0], &Operand::State(StatePrefix::FeatureAction, "Core".into()));
        assert_eq!(refs[1], &Operand::State(StatePrefix::ComponentInstalled, "Main".into()));
    }

    #[test]
    fn test_parentheses() {
        let c = Condition::parse("(A OR B) AND C").unwrap();
        assert!(matches!(c.expr, Expr::And(..)));
    }

    #[test]
    fn test_syntax_errors() {
        for text in ["", "A AND", "(A OR B", "A = ", "\"open", "A # B", "& = 1", "A B"] {
            assert!(Condition::parse(text).is_err(), "should reject {:?}", text);
        }
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_known_names_accepted() {
        let s = scope();
        assert!(check_guard("Launch", "NOT Installed AND &Core = 3", &s).is_ok());
        assert!(check_guard("Launch", "INSTALLFOLDER <> \"\" AND $Main = 3", &s).is_ok());
        assert!(check_guard("Launch", "NOT REMOVE~=\"ALL\"", &s).is_ok());
        assert!(check_guard("Launch", "%USERDOMAIN >< \"CORP\" AND NOT Installed", &s).is_ok());
    }

    #[test]
    fn test_unknown_variable() {
        let err = check_guard("Launch", "NOT Instaled", &scope()).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownGuardVariable {
                action: "Launch".into(),
                variable: "Instaled".into()
            }
        );
    }

    #[test]
    fn test_state_prefix_must_name_declared_entity() {
        assert!(matches!(
            check_guard("Launch", "&Main = 3", &scope()),
            Err(CompileError::UnknownGuardVariable { .. })
        ));
    }

    #[test]
    fn test_guard_cannot_reference_own_action() {
        let err = check_guard("Launch", "NOT Installed AND Launch = 1", &scope()).unwrap_err();
        assert_eq!(
            err,
            CompileError::GuardDependsOnAction {
                action: "Launch".into()
            }
        );
    }

    #[test]
    fn test_malformed_guard() {
        assert!(matches!(
            check_guard("Launch", "NOT (Installed", &scope()),
            Err(CompileError::MalformedGuard { .. })
        ));
    }
}
