//! Parenthesized token lists as used by the SimSpark monitor protocol.
//!
//! An expression holds its own atoms (whitespace separated tokens) and its
//! child expressions. The relative order of atoms and children is not kept,
//! which matches how the server lays out every message it sends.

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::take_till1,
    character::complete::{char, multispace0},
    combinator::map,
    multi::many0,
    sequence::{delimited, preceded},
};

use crate::{Error, ErrorKind, Result};

type StrResult<'a, T> = nom::IResult<&'a str, T, Error>;

/// Deepest nesting accepted. Scene graphs from the server stay far below it.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SExp<'a> {
    atoms: Vec<&'a str>,
    children: Vec<SExp<'a>>,
}

enum Item<'a> {
    Atom(&'a str),
    Child(SExp<'a>),
}

fn atom(input: &str) -> StrResult<'_, &str> {
    take_till1(|c: char| c.is_whitespace() || c == '(' || c == ')')(input)
}

fn item(input: &str) -> StrResult<'_, Item<'_>> {
    alt((map(expression, Item::Child), map(atom, Item::Atom)))(input)
}

fn expression(input: &str) -> StrResult<'_, SExp<'_>> {
    let (rest, items) = delimited(
        char('('),
        many0(preceded(multispace0, item)),
        preceded(multispace0, char(')')),
    )(input)?;

    let mut exp = SExp::default();
    for item in items {
        match item {
            Item::Atom(a) => exp.atoms.push(a),
            Item::Child(c) => exp.children.push(c),
        }
    }
    Ok((rest, exp))
}

/// Rejects input nested deeper than [`MAX_DEPTH`] before the recursive
/// parser sees it. Atoms never contain parentheses, so counting bytes is exact.
fn check_depth(input: &str) -> Result<()> {
    let mut depth = 0usize;
    for b in input.bytes() {
        match b {
            b'(' => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(Error::malformed("nesting too deep"));
                }
            }
            b')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

impl<'a> SExp<'a> {
    /// Parses every top-level expression in `input`.
    ///
    /// Fails if parentheses are unbalanced or if anything but whitespace is left
    /// between or after the top-level expressions.
    pub fn parse_all(input: &'a str) -> Result<Vec<SExp<'a>>> {
        check_depth(input)?;
        let (rest, expressions) = many0(preceded(multispace0, expression))(input)
            .map_err(|_| Error::malformed("unparseable expression"))?;
        let rest = rest.trim_start();
        if !rest.is_empty() {
            let offset = input.len() - rest.len();
            let reason = if rest.starts_with(')') {
                format!("unmatched ')' at offset {offset}")
            } else if rest.starts_with('(') {
                format!("unclosed '(' at offset {offset}")
            } else {
                format!("stray token at offset {offset}")
            };
            return Err(ErrorKind::MalformedMessage(reason).into());
        }
        Ok(expressions)
    }

    pub fn atoms(&self) -> &[&'a str] {
        &self.atoms
    }

    pub fn children(&self) -> &[SExp<'a>] {
        &self.children
    }

    /// First atom, which names the expression in every message the server sends.
    pub fn name(&self) -> Option<&'a str> {
        self.atoms.first().copied()
    }

    /// Atoms following the name.
    pub fn args(&self) -> &[&'a str] {
        self.atoms.get(1..).unwrap_or(&[])
    }

    /// First child expression named `name`.
    pub fn child(&self, name: &str) -> Option<&SExp<'a>> {
        self.children.iter().find(|c| c.name() == Some(name))
    }
}

impl fmt::Display for SExp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        for atom in &self.atoms {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{atom}")?;
            first = false;
        }
        for child in &self.children {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{child}")?;
            first = false;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_atoms_and_children() {
        let exps = SExp::parse_all("(nd TRF (SLT 1 0 0 0))(RSG 0 1)").unwrap();
        assert_eq!(exps.len(), 2);
        assert_eq!(exps[0].atoms(), &["nd", "TRF"]);
        assert_eq!(exps[0].children().len(), 1);
        assert_eq!(exps[0].children()[0].name(), Some("SLT"));
        assert_eq!(exps[0].children()[0].args(), &["1", "0", "0", "0"]);
        assert_eq!(exps[1].args(), &["0", "1"]);
    }

    #[test]
    fn tolerates_whitespace_and_empty_expressions() {
        let exps = SExp::parse_all("  ( ) \n ( a  (b) )\r\n").unwrap();
        assert_eq!(exps.len(), 2);
        assert!(exps[0].atoms().is_empty());
        assert_eq!(exps[1].child("b").map(|c| c.atoms().len()), Some(1));
    }

    #[test]
    fn unbalanced_nesting_is_malformed() {
        for input in ["(a (b)", "(a))", "((a)", ")"] {
            let err = SExp::parse_all(input).unwrap_err();
            assert!(
                matches!(err.kind, ErrorKind::MalformedMessage(_)),
                "{input} gave {err:?}"
            );
        }
    }

    #[test]
    fn deep_nesting_is_malformed() {
        let within = format!("{}{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(SExp::parse_all(&within).unwrap().len(), 1);

        let depth = 50_000;
        let deep = format!("(){}{}(RDS 0 1)()", "(".repeat(depth), ")".repeat(depth));
        let err = SExp::parse_all(&deep).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MalformedMessage(ref m) if m == "nesting too deep"));
    }

    #[test]
    fn stray_top_level_atom_is_malformed() {
        assert!(SExp::parse_all("(a) b").is_err());
    }

    #[test]
    fn display_writes_atoms_before_children() {
        let exps = SExp::parse_all("(kickOff (x 1) Left)").unwrap();
        assert_eq!(exps[0].to_string(), "(kickOff Left (x 1))");
    }
}
