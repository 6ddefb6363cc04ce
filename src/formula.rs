//! Molecular formula canonicalization.
//!
//! Catalogue formulas are typeset for humans (`C₇H₆NO₂⁺`, `(C₆H₁₀O₅)ₙ`) while
//! interpreters hand back plain ASCII (`C7H6NO2+`). Both end up here and are reduced
//! to an [`ElementCount`], which is what actually gets compared.

use nom::{
    bytes::complete::is_not,
    character::complete::{char, digit0, one_of, satisfy},
    combinator::{all_consuming, opt, recognize},
    sequence::{delimited, pair, terminated},
    IResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use tracing::*;

/// Markers that turn a parenthesized group into a repeating unit, e.g. `(C₆H₁₀O₅)ₙ`.
const REPEAT_MARKERS: &str = "nₙxₓmₘ";

const SUPERSCRIPT_PLUS: char = '\u{207A}';
const SUPERSCRIPT_MINUS: char = '\u{207B}';

/// A multiset of element symbols.
///
/// Entries with a count of zero are never stored, so two counts are equal exactly
/// when they hold the same symbols with the same counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ElementCount(BTreeMap<String, usize>);

impl ElementCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// The count for `symbol`, zero when the element is absent.
    pub fn get(&self, symbol: &str) -> usize {
        self.0.get(symbol).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of atoms.
    pub fn atoms(&self) -> usize {
        self.0.values().sum()
    }

    /// Elements in Hill order: carbon, hydrogen, then the rest alphabetically.
    pub fn hill_order(&self) -> Vec<(&str, usize)> {
        let mut elements: Vec<(&str, usize)> =
            self.0.iter().map(|(symbol, &count)| (symbol.as_str(), count)).collect();
        elements.sort_by(|(a, _), (b, _)| hill_key(a).cmp(&hill_key(b)));
        elements
    }

    /// Every element whose count differs between `self` (expected) and `actual`.
    pub fn differences(&self, actual: &ElementCount) -> Vec<ElementDelta> {
        let mut symbols: Vec<&str> = self
            .0
            .keys()
            .chain(actual.0.keys())
            .map(String::as_str)
            .collect();
        symbols.sort_by(|a, b| hill_key(a).cmp(&hill_key(b)));
        symbols.dedup();

        symbols
            .into_iter()
            .filter_map(|symbol| {
                let expected = self.get(symbol);
                let found = actual.get(symbol);
                (expected != found).then(|| ElementDelta {
                    element: symbol.to_string(),
                    expected,
                    actual: found,
                })
            })
            .collect()
    }

    pub(crate) fn add(&mut self, symbol: &str, count: usize) {
        let slot = self.0.entry(symbol.to_string()).or_insert(0);
        *slot = slot.saturating_add(count);
    }

    fn drop_zeros(&mut self) {
        self.0.retain(|_, count| *count > 0);
    }
}

fn hill_key(symbol: &str) -> (u8, &str) {
    match symbol {
        "C" => (0, ""),
        "H" => (1, ""),
        other => (2, other),
    }
}

/// Builds a count from `(symbol, count)` pairs. Pairs whose symbol is not an element
/// token are dropped.
impl<S: AsRef<str>> FromIterator<(S, usize)> for ElementCount {
    fn from_iter<T: IntoIterator<Item = (S, usize)>>(iter: T) -> Self {
        let mut counts = ElementCount::new();
        for (symbol, count) in iter {
            let symbol = symbol.as_ref();
            if all_consuming(element_symbol)(symbol).is_err() {
                trace!("Dropping {symbol:?}, not an element symbol");
                continue;
            }
            counts.add(symbol, count);
        }
        counts.drop_zeros();
        counts
    }
}

/// Renders the count as a formula: symbol then count, the count omitted when it is 1.
impl Display for ElementCount {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (symbol, count) in self.hill_order() {
            if count == 1 {
                write!(f, "{symbol}")?;
            } else {
                write!(f, "{symbol}{count}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for ElementCount {
    type Err = Infallible;

    fn from_str(formula: &str) -> Result<Self, Self::Err> {
        Ok(canonicalize(formula))
    }
}

/// One element whose expected and actual counts disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementDelta {
    pub element: String,
    pub expected: usize,
    pub actual: usize,
}

impl ElementDelta {
    /// Signed change from expected to actual.
    ///
    /// Saturates at the bounds of `i64` for counts too far apart to represent.
    pub fn change(&self) -> i64 {
        let change = self.actual as i128 - self.expected as i128;
        change.clamp(i64::MIN.into(), i64::MAX.into()) as i64
    }
}

impl Display for ElementDelta {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{:+}", self.element, self.change())
    }
}

/// Canonicalizes a formula string into an [`ElementCount`].
///
/// Subscript digits become ASCII digits, superscript charge marks are dropped and
/// repeating units like `(C₆H₁₀O₅)ₙ` are reduced to a single unit before the string
/// is tokenized. Anything that does not look like an element token is skipped, so
/// this never fails: text without any element token gives an empty count.
///
/// ```
/// use molcheck::canonicalize;
/// assert_eq!(canonicalize("C₂H₆O"), canonicalize("C2H6O"));
/// assert_eq!(canonicalize("C₂H₆O").to_string(), "C2H6O");
/// ```
pub fn canonicalize(formula: &str) -> ElementCount {
    let normalized = strip_charges(&normalize_subscripts(formula));
    let unwrapped = unwrap_repeat_units(&normalized);
    let counts = tokenize(&unwrapped);
    trace!("Canonicalized {formula:?} to {counts}");
    counts
}

/// Maps subscript digits (U+2080 to U+2089) to their ASCII digits.
pub fn normalize_subscripts(formula: &str) -> String {
    formula
        .chars()
        .map(|c| match c {
            '\u{2080}'..='\u{2089}' => char::from(b'0' + (c as u32 - 0x2080) as u8),
            _ => c,
        })
        .collect()
}

fn strip_charges(formula: &str) -> String {
    formula
        .chars()
        .filter(|&c| c != SUPERSCRIPT_PLUS && c != SUPERSCRIPT_MINUS)
        .collect()
}

/// `(<contents>)<marker>`, yielding the contents.
fn repeat_unit(input: &str) -> IResult<&str, &str> {
    terminated(
        delimited(char('('), is_not("()"), char(')')),
        one_of(REPEAT_MARKERS),
    )(input)
}

fn unwrap_repeat_units(formula: &str) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut rest = formula;
    while let Some(c) = rest.chars().next() {
        match repeat_unit(rest) {
            Ok((remaining, unit)) => {
                out.push_str(unit);
                rest = remaining;
            }
            Err(_) => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

/// An uppercase letter, greedily followed by one lowercase letter.
fn element_symbol(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_uppercase()),
        opt(satisfy(|c| c.is_ascii_lowercase())),
    ))(input)
}

fn element_token(input: &str) -> IResult<&str, (&str, usize)> {
    let (input, symbol) = element_symbol(input)?;
    let (input, digits) = digit0(input)?;
    Ok((input, (symbol, parse_count(digits))))
}

fn parse_count(digits: &str) -> usize {
    if digits.is_empty() {
        return 1;
    }
    digits.bytes().fold(0usize, |acc, digit| {
        acc.saturating_mul(10).saturating_add(usize::from(digit - b'0'))
    })
}

/// Tokenizes a plain ASCII formula, summing repeated elements.
pub fn tokenize(formula: &str) -> ElementCount {
    let mut counts = ElementCount::new();
    let mut rest = formula;
    while let Some(c) = rest.chars().next() {
        match element_token(rest) {
            Ok((remaining, (symbol, count))) => {
                counts.add(symbol, count);
                rest = remaining;
            }
            // Not an element token: skip one character.
            Err(_) => rest = &rest[c.len_utf8()..],
        }
    }
    counts.drop_zeros();
    counts
}
