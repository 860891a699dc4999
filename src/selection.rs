//! Source selection: a small boolean expression language over `name`,
//! `dist`, `flux` and `sqrtts`, or an equivalent Rust closure.
//!
//! ```text
//! dist <= 2.5 AND (flux > 1e-7 OR name == '2AGLJ2021+4029')
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::error::AnalysisError;
use crate::source::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variable {
    Name,
    Dist,
    Flux,
    Sqrtts,
}

impl FromStr for Variable {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "name" => Ok(Variable::Name),
            "dist" => Ok(Variable::Dist),
            "flux" => Ok(Variable::Flux),
            "sqrtts" => Ok(Variable::Sqrtts),
            other => Err(AnalysisError::SelectionParamNotSupported(other.to_string())),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variable::Name => "name",
            Variable::Dist => "dist",
            Variable::Flux => "flux",
            Variable::Sqrtts => "sqrtts",
        };
        f.write_str(name)
    }
}

/// Values a selection sees for one source. `flux` and `dist` come from the
/// fit results when the source has them; `sqrtts` is NaN without a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionFields<'a> {
    pub name: &'a str,
    pub dist: f64,
    pub flux: f64,
    pub sqrtts: f64,
}

impl<'a> SelectionFields<'a> {
    pub fn of(source: &'a Source) -> Self {
        Self {
            name: &source.name,
            dist: source.selection_dist(),
            flux: source.selection_flux(),
            sqrtts: source.multi.as_ref().map_or(f64::NAN, |multi| multi.sqrtts),
        }
    }
}

type Evaluator = Arc<dyn Fn(&SelectionFields<'_>) -> bool + Send + Sync>;

/// A closure selection together with the variables it reads.
#[derive(Clone)]
pub struct Predicate {
    variables: Vec<String>,
    eval: Evaluator,
}

impl Predicate {
    pub fn new<F>(variables: &[&str], eval: F) -> Self
    where
        F: Fn(&SelectionFields<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            variables: variables.iter().map(|v| v.to_string()).collect(),
            eval: Arc::new(eval),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Selection {
    Expression(String),
    Predicate(Predicate),
}

impl From<&str> for Selection {
    fn from(value: &str) -> Self {
        Selection::Expression(value.to_string())
    }
}

impl From<String> for Selection {
    fn from(value: String) -> Self {
        Selection::Expression(value)
    }
}

impl From<Predicate> for Selection {
    fn from(value: Predicate) -> Self {
        Selection::Predicate(value)
    }
}

impl Selection {
    pub fn compile(&self) -> Result<CompiledSelection, AnalysisError> {
        match self {
            Selection::Expression(text) => {
                let expr = Parser::new(text)?.parse()?;
                let mut variables = BTreeSet::new();
                expr.collect_variables(&mut variables);
                Ok(CompiledSelection {
                    variables,
                    eval: Arc::new(move |fields: &SelectionFields<'_>| expr.eval(fields)),
                })
            }
            Selection::Predicate(predicate) => {
                let variables = predicate
                    .variables
                    .iter()
                    .map(|name| name.parse())
                    .collect::<Result<BTreeSet<Variable>, _>>()?;
                Ok(CompiledSelection {
                    variables,
                    eval: Arc::clone(&predicate.eval),
                })
            }
        }
    }
}

/// A selection resolved once, ready to test sources.
#[derive(Clone)]
pub struct CompiledSelection {
    variables: BTreeSet<Variable>,
    eval: Evaluator,
}

impl fmt::Debug for CompiledSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSelection")
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

impl CompiledSelection {
    pub fn variables(&self) -> &BTreeSet<Variable> {
        &self.variables
    }

    pub fn references(&self, variable: Variable) -> bool {
        self.variables.contains(&variable)
    }

    /// Sources without a fit never match a selection on `sqrtts`.
    pub fn matches(&self, source: &Source) -> bool {
        if self.references(Variable::Sqrtts) && !source.is_fit_complete() {
            warn!(
                source = %source.name,
                "skipping source without fit results in sqrtts selection"
            );
            return false;
        }
        (self.eval)(&SelectionFields::of(source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The operator seen from the other side: `3 < x` is `x > 3`.
    fn flipped(self) -> Self {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            other => other,
        }
    }

    fn apply<T: PartialOrd + ?Sized>(self, left: &T, right: &T) -> bool {
        match self {
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone)]
enum Expr {
    Compare {
        variable: Variable,
        op: CmpOp,
        literal: Literal,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, fields: &SelectionFields<'_>) -> bool {
        match self {
            Expr::And(left, right) => left.eval(fields) && right.eval(fields),
            Expr::Or(left, right) => left.eval(fields) || right.eval(fields),
            Expr::Compare {
                variable,
                op,
                literal,
            } => match (variable, literal) {
                (Variable::Name, Literal::Text(text)) => op.apply(fields.name, text.as_str()),
                (Variable::Dist, Literal::Number(n)) => op.apply(&fields.dist, n),
                (Variable::Flux, Literal::Number(n)) => op.apply(&fields.flux, n),
                (Variable::Sqrtts, Literal::Number(n)) => op.apply(&fields.sqrtts, n),
                _ => false,
            },
        }
    }

    fn collect_variables(&self, into: &mut BTreeSet<Variable>) {
        match self {
            Expr::Compare { variable, .. } => {
                into.insert(*variable);
            }
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_variables(into);
                right.collect_variables(into);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Text(String),
    Op(CmpOp),
    And,
    Or,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, AnalysisError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '\'' | '"' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == c)
                    .map(|offset| start + offset)
                    .ok_or_else(|| syntax(input, "unterminated string literal"))?;
                tokens.push(Token::Text(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (CmpOp::Eq, 2),
                    ('!', Some('=')) => (CmpOp::Ne, 2),
                    ('<', Some('=')) => (CmpOp::Le, 2),
                    ('>', Some('=')) => (CmpOp::Ge, 2),
                    ('<', _) => (CmpOp::Lt, 1),
                    ('>', _) => (CmpOp::Gt, 1),
                    _ => return Err(syntax(input, &format!("unexpected '{c}' at {i}"))),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            c if c.is_ascii_digit()
                || c == '.'
                || ((c == '-' || c == '+')
                    && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit() || *n == '.')) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    let exponent_sign =
                        (ch == '-' || ch == '+') && matches!(chars[i - 1], 'e' | 'E');
                    if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' || exponent_sign
                    {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| syntax(input, &format!("invalid number {text}")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "AND" | "and" => Token::And,
                    "OR" | "or" => Token::Or,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(syntax(input, &format!("unexpected '{other}' at {i}"))),
        }
    }
    Ok(tokens)
}

fn syntax(input: &str, message: &str) -> AnalysisError {
    AnalysisError::SelectionSyntax(format!("{message} in \"{input}\""))
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, AnalysisError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    fn parse(mut self) -> Result<Expr, AnalysisError> {
        if self.tokens.is_empty() {
            return Err(syntax(self.input, "empty selection"));
        }
        let expr = self.parse_or()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some(token) => Err(syntax(self.input, &format!("unexpected {token:?}"))),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<Expr, AnalysisError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, AnalysisError> {
        let mut left = self.parse_primary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_primary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, AnalysisError> {
        if self.peek() == Some(&Token::Open) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.next() {
                Some(Token::Close) => Ok(inner),
                _ => Err(syntax(self.input, "missing ')'")),
            };
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, AnalysisError> {
        let left = self.next();
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(syntax(
                    self.input,
                    &format!("expected a comparison operator, found {other:?}"),
                ));
            }
        };
        let right = self.next();

        let (name, op, literal) = match (left, right) {
            (Some(Token::Ident(name)), Some(literal)) => (name, op, literal),
            (Some(literal), Some(Token::Ident(name))) => (name, op.flipped(), literal),
            _ => {
                return Err(syntax(
                    self.input,
                    "a comparison needs a variable and a literal",
                ));
            }
        };
        let variable: Variable = name.parse()?;
        let literal = match literal {
            Token::Number(n) => Literal::Number(n),
            Token::Text(text) => Literal::Text(text),
            other => {
                return Err(syntax(self.input, &format!("expected a literal, found {other:?}")));
            }
        };

        match (variable, &literal) {
            (Variable::Name, Literal::Text(_)) => {}
            (Variable::Name, Literal::Number(_)) => {
                return Err(syntax(self.input, "name compares against a quoted string"));
            }
            (_, Literal::Text(_)) => {
                return Err(syntax(
                    self.input,
                    &format!("{variable} compares against a number"),
                ));
            }
            _ => {}
        }

        Ok(Expr::Compare {
            variable,
            op,
            literal,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn fields(name: &str, dist: f64, flux: f64) -> SelectionFields<'_> {
        SelectionFields {
            name,
            dist,
            flux,
            sqrtts: 5.0,
        }
    }

    fn eval(expr: &str, fields: &SelectionFields<'_>) -> bool {
        let compiled = Selection::from(expr).compile().unwrap();
        (compiled.eval)(fields)
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let f = fields("A", 10.0, 0.0);
        assert!(eval("name == 'A' OR dist < 1 AND flux > 1", &f));
        assert!(!eval("(name == 'A' OR dist < 1) AND flux > 1", &f));
    }

    #[test]
    fn lowercase_keywords_and_reversed_operands() {
        let f = fields("B", 2.0, 3e-7);
        assert!(eval("1 < dist and flux >= 3e-7", &f));
        assert!(eval("dist > 5 or \"B\" == name", &f));
        assert!(eval("flux != 1.5E-7", &f));
    }

    #[test]
    fn unknown_variable_is_rejected() {
        let err = Selection::from("ts > 25").compile().unwrap_err();
        assert_matches!(err, AnalysisError::SelectionParamNotSupported(name) if name == "ts");

        let predicate = Predicate::new(&["index"], |_| true);
        let err = Selection::from(predicate).compile().unwrap_err();
        assert_matches!(err, AnalysisError::SelectionParamNotSupported(_));
    }

    #[test]
    fn malformed_expressions_are_syntax_errors() {
        for bad in ["", "dist <", "(dist < 1", "dist < 1 AND", "dist = 1", "name == 3", "flux > 'x'"] {
            let err = Selection::from(bad).compile().unwrap_err();
            assert_matches!(err, AnalysisError::SelectionSyntax(_), "{bad}");
        }
    }

    #[test]
    fn collects_referenced_variables() {
        let compiled = Selection::from("sqrtts > 3 AND (dist < 1 OR dist > 5)")
            .compile()
            .unwrap();
        assert!(compiled.references(Variable::Sqrtts));
        assert!(compiled.references(Variable::Dist));
        assert!(!compiled.references(Variable::Flux));
    }
}
