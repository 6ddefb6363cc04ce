// src/smiles.rs

use crate::{ElementCount, InterpretError, StructureInterpreter};
use nom::{
    branch::alt,
    bytes::complete::{is_a, tag},
    character::complete::{char, digit0, digit1, one_of, satisfy},
    combinator::{all_consuming, opt, recognize},
    error::{Error as NomError, ErrorKind},
    sequence::{pair, preceded},
    IResult,
};
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::BTreeMap;
use std::fmt::Write;
use thiserror::Error;
use tracing::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SmilesError {
    #[error("Empty SMILES string")]
    Empty,
    #[error("Unknown element symbol '{0}' at position {1}")]
    UnknownElement(String, usize),
    #[error("Branch start '(' at position {0} without a current atom")]
    BranchNoCurrentAtom(usize),
    #[error("Branch end ')' at position {0} without a matching '('")]
    BranchEndNoStart(usize),
    #[error("Branch '(' opened at position {0} is never closed")]
    UnclosedBranch(usize),
    #[error("Ring closure {0} at position {1} without a current atom")]
    RingClosureNoCurrentAtom(u8, usize),
    #[error("Ring closure {0} opened at position {1} is never closed")]
    UnclosedRing(u8, usize),
    #[error("Incomplete ring closure after '%' at position {0}")]
    IncompleteRingClosure(usize),
    #[error("Bond '{0}' at position {1} does not connect two atoms")]
    DanglingBond(char, usize),
    #[error("Unclosed bracket '[' at position {0}")]
    UnclosedBracket(usize),
    #[error("Invalid bracket atom '[{0}]' at position {1}")]
    InvalidBracketAtom(String, usize),
    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedCharacter(char, usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bond {
    Single,
    Double,
    Triple,
    Quadruple,
    Aromatic,
}

impl Bond {
    /// Valence used by this bond on each of its atoms.
    pub fn order(&self) -> u32 {
        match self {
            Bond::Single | Bond::Aromatic => 1,
            Bond::Double => 2,
            Bond::Triple => 3,
            Bond::Quadruple => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Element symbol, capitalized (`c` is stored as `C`).
    pub symbol: String,
    pub aromatic: bool,
    /// Written inside `[...]`. Bracket atoms never get implicit hydrogens.
    pub bracket: bool,
    /// Hydrogens written explicitly inside the brackets.
    pub hydrogens: u32,
    pub charge: i32,
}

impl Atom {
    fn organic(symbol: &str, aromatic: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            aromatic,
            bracket: false,
            hydrogens: 0,
            charge: 0,
        }
    }
}

pub type MoleculeGraph = UnGraph<Atom, Bond>;

const PERIODIC_TABLE: &[&str] = &[
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S",
    "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga",
    "Ge", "As", "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd",
    "Ag", "Cd", "In", "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm",
    "Sm", "Eu", "Gd", "Tb", "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os",
    "Ir", "Pt", "Au", "Hg", "Tl", "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa",
    "U", "Np", "Pu", "Am", "Cm", "Bk", "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg",
    "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh", "Fl", "Mc", "Lv", "Ts", "Og",
];

fn is_element(symbol: &str) -> bool {
    PERIODIC_TABLE.contains(&symbol)
}

/// Normal valences of the organic subset, lowest first.
fn default_valences(symbol: &str) -> &'static [u32] {
    match symbol {
        "B" => &[3],
        "C" => &[4],
        "N" | "P" => &[3, 5],
        "O" => &[2],
        "S" => &[2, 4, 6],
        "F" | "Cl" | "Br" | "I" => &[1],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingBond {
    bond: Bond,
    symbol: char,
    position: usize,
}

#[derive(Debug, Clone, Copy)]
struct RingOpening {
    atom: NodeIndex,
    bond: Option<Bond>,
    position: usize,
}

/// Parses a SMILES string into a MoleculeGraph.
///
/// Supports the organic subset (aromatic or not), bracket atoms with isotopes,
/// chirality, hydrogen counts, charges and atom classes, branches, ring closures
/// (including `%nn`), explicit and directional bonds and disconnected components.
/// Stereochemistry is read and discarded.
pub fn parse_smiles(smiles: &str) -> Result<MoleculeGraph, SmilesError> {
    let mut graph = MoleculeGraph::new_undirected();
    let mut current_atom: Option<NodeIndex> = None;
    let mut pending_bond: Option<PendingBond> = None;
    let mut branch_stack: Vec<(NodeIndex, usize)> = Vec::new();
    let mut ring_map: BTreeMap<u8, RingOpening> = BTreeMap::new();

    let chars: Vec<char> = smiles.trim().chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => {
                let atom = current_atom.ok_or(SmilesError::BranchNoCurrentAtom(i))?;
                expect_no_pending_bond(pending_bond)?;
                branch_stack.push((atom, i));
                i += 1;
            }
            ')' => {
                expect_no_pending_bond(pending_bond)?;
                let (atom, _) = branch_stack
                    .pop()
                    .ok_or(SmilesError::BranchEndNoStart(i))?;
                current_atom = Some(atom);
                i += 1;
            }
            '-' | '=' | '#' | '$' | ':' | '/' | '\\' => {
                if current_atom.is_none() || pending_bond.is_some() {
                    return Err(SmilesError::DanglingBond(c, i));
                }
                let bond = match c {
                    '=' => Bond::Double,
                    '#' => Bond::Triple,
                    '$' => Bond::Quadruple,
                    ':' => Bond::Aromatic,
                    // '/' and '\' only carry double bond geometry.
                    _ => Bond::Single,
                };
                pending_bond = Some(PendingBond {
                    bond,
                    symbol: c,
                    position: i,
                });
                i += 1;
            }
            '0'..='9' => {
                let number = c as u8 - b'0';
                ring_bond(
                    &mut graph,
                    &mut ring_map,
                    current_atom,
                    &mut pending_bond,
                    number,
                    i,
                )?;
                i += 1;
            }
            '%' => {
                // Two-digit ring closure label.
                let number = match (chars.get(i + 1), chars.get(i + 2)) {
                    (Some(&a), Some(&b)) if a.is_ascii_digit() && b.is_ascii_digit() => {
                        (a as u8 - b'0') * 10 + (b as u8 - b'0')
                    }
                    _ => return Err(SmilesError::IncompleteRingClosure(i)),
                };
                ring_bond(
                    &mut graph,
                    &mut ring_map,
                    current_atom,
                    &mut pending_bond,
                    number,
                    i,
                )?;
                i += 3;
            }
            '[' => {
                let end = chars[i..]
                    .iter()
                    .position(|&x| x == ']')
                    .map(|relative| i + relative)
                    .ok_or(SmilesError::UnclosedBracket(i))?;
                let content: String = chars[i + 1..end].iter().collect();
                let parsed = all_consuming(bracket_atom)(content.as_str())
                    .map(|(_, atom)| atom)
                    .ok();
                let atom = parsed.ok_or(SmilesError::InvalidBracketAtom(content, i))?;
                add_atom(&mut graph, &mut current_atom, &mut pending_bond, atom);
                i = end + 1;
            }
            '.' => {
                // The next atom starts a new, disconnected component.
                expect_no_pending_bond(pending_bond)?;
                current_atom = None;
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '*' => {
                let (symbol, aromatic, width) = organic_atom(&chars[i..])
                    .ok_or_else(|| SmilesError::UnknownElement(c.to_string(), i))?;
                add_atom(
                    &mut graph,
                    &mut current_atom,
                    &mut pending_bond,
                    Atom::organic(symbol, aromatic),
                );
                i += width;
            }
            _ => return Err(SmilesError::UnexpectedCharacter(c, i)),
        }
    }

    expect_no_pending_bond(pending_bond)?;
    if let Some(&(_, position)) = branch_stack.first() {
        return Err(SmilesError::UnclosedBranch(position));
    }
    if let Some((&number, opening)) = ring_map.iter().next() {
        return Err(SmilesError::UnclosedRing(number, opening.position));
    }
    if graph.node_count() == 0 {
        return Err(SmilesError::Empty);
    }

    trace!(
        "Parsed {smiles} into {} atoms and {} bonds",
        graph.node_count(),
        graph.edge_count()
    );
    Ok(graph)
}

fn expect_no_pending_bond(pending_bond: Option<PendingBond>) -> Result<(), SmilesError> {
    match pending_bond {
        Some(pending) => Err(SmilesError::DanglingBond(pending.symbol, pending.position)),
        None => Ok(()),
    }
}

/// Bond used when none is written: aromatic between two aromatic atoms, else single.
fn default_bond(graph: &MoleculeGraph, a: NodeIndex, b: NodeIndex) -> Bond {
    if graph[a].aromatic && graph[b].aromatic {
        Bond::Aromatic
    } else {
        Bond::Single
    }
}

fn add_atom(
    graph: &mut MoleculeGraph,
    current_atom: &mut Option<NodeIndex>,
    pending_bond: &mut Option<PendingBond>,
    atom: Atom,
) {
    let new_atom = graph.add_node(atom);
    if let Some(prev_atom) = *current_atom {
        let bond = pending_bond
            .take()
            .map(|pending| pending.bond)
            .unwrap_or_else(|| default_bond(graph, prev_atom, new_atom));
        graph.add_edge(prev_atom, new_atom, bond);
    }
    *current_atom = Some(new_atom);
}

fn ring_bond(
    graph: &mut MoleculeGraph,
    ring_map: &mut BTreeMap<u8, RingOpening>,
    current_atom: Option<NodeIndex>,
    pending_bond: &mut Option<PendingBond>,
    number: u8,
    position: usize,
) -> Result<(), SmilesError> {
    let current = current_atom.ok_or(SmilesError::RingClosureNoCurrentAtom(number, position))?;
    let written = pending_bond.take().map(|pending| pending.bond);
    match ring_map.remove(&number) {
        Some(opening) => {
            let bond = written
                .or(opening.bond)
                .unwrap_or_else(|| default_bond(graph, opening.atom, current));
            graph.add_edge(opening.atom, current, bond);
        }
        None => {
            ring_map.insert(
                number,
                RingOpening {
                    atom: current,
                    bond: written,
                    position,
                },
            );
        }
    }
    Ok(())
}

/// Matches an organic-subset atom at the start of `chars`, returning its symbol,
/// aromaticity and width in characters.
fn organic_atom(chars: &[char]) -> Option<(&'static str, bool, usize)> {
    let next = chars.get(1).copied();
    match (chars.first().copied()?, next) {
        ('C', Some('l')) => Some(("Cl", false, 2)),
        ('B', Some('r')) => Some(("Br", false, 2)),
        ('B', _) => Some(("B", false, 1)),
        ('C', _) => Some(("C", false, 1)),
        ('N', _) => Some(("N", false, 1)),
        ('O', _) => Some(("O", false, 1)),
        ('P', _) => Some(("P", false, 1)),
        ('S', _) => Some(("S", false, 1)),
        ('F', _) => Some(("F", false, 1)),
        ('I', _) => Some(("I", false, 1)),
        ('b', _) => Some(("B", true, 1)),
        ('c', _) => Some(("C", true, 1)),
        ('n', _) => Some(("N", true, 1)),
        ('o', _) => Some(("O", true, 1)),
        ('p', _) => Some(("P", true, 1)),
        ('s', _) => Some(("S", true, 1)),
        _ => None,
    }
}

fn capitalize(symbol: &str) -> String {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Element symbol inside brackets, either aromatic (`c`, `se`) or any element.
fn bracket_symbol(input: &str) -> IResult<&str, (String, bool)> {
    let aromatic: IResult<&str, &str> = alt((
        tag("se"),
        tag("as"),
        tag("te"),
        recognize(one_of("bcnops")),
    ))(input);
    if let Ok((rest, symbol)) = aromatic {
        return Ok((rest, (capitalize(symbol), true)));
    }

    let (rest, symbol) = recognize(pair(
        satisfy(|c| c.is_ascii_uppercase()),
        opt(satisfy(|c| c.is_ascii_lowercase())),
    ))(input)?;
    if is_element(symbol) {
        return Ok((rest, (symbol.to_string(), false)));
    }
    // "[Hg]" is mercury, but a two-letter miss may still start with a valid element.
    let single = &symbol[..1];
    if symbol.len() == 2 && is_element(single) {
        return Ok((&input[1..], (single.to_string(), false)));
    }
    Err(nom::Err::Error(NomError::new(input, ErrorKind::Verify)))
}

fn chirality(input: &str) -> IResult<&str, Option<&str>> {
    opt(recognize(pair(
        is_a("@"),
        opt(pair(
            alt((tag("TH"), tag("AL"), tag("SP"), tag("TB"), tag("OH"))),
            digit1,
        )),
    )))(input)
}

fn hydrogen_count(input: &str) -> IResult<&str, u32> {
    let (rest, digits) = opt(preceded(char('H'), digit0))(input)?;
    let count = match digits {
        None => 0,
        Some("") => 1,
        Some(digits) => digits
            .parse()
            .map_err(|_| nom::Err::Error(NomError::new(input, ErrorKind::Digit)))?,
    };
    Ok((rest, count))
}

fn charge(input: &str) -> IResult<&str, i32> {
    let (rest, signs) = opt(alt((is_a("+"), is_a("-"))))(input)?;
    let Some(signs) = signs else {
        return Ok((input, 0));
    };
    let sign = if signs.starts_with('+') { 1 } else { -1 };
    if signs.len() > 1 {
        // "++" or "--"
        return Ok((rest, sign * signs.len() as i32));
    }
    let (rest, digits) = digit0(rest)?;
    let magnitude: i32 = if digits.is_empty() {
        1
    } else {
        digits
            .parse()
            .map_err(|_| nom::Err::Error(NomError::new(rest, ErrorKind::Digit)))?
    };
    Ok((rest, sign * magnitude))
}

/// `isotope? symbol chirality? hcount? charge? class?`, without the brackets.
fn bracket_atom(input: &str) -> IResult<&str, Atom> {
    let (input, _isotope) = digit0(input)?;
    let (input, (symbol, aromatic)) = bracket_symbol(input)?;
    let (input, _chirality) = chirality(input)?;
    let (input, hydrogens) = hydrogen_count(input)?;
    let (input, charge) = charge(input)?;
    let (input, _class) = opt(preceded(char(':'), digit1))(input)?;
    Ok((
        input,
        Atom {
            symbol,
            aromatic,
            bracket: true,
            hydrogens,
            charge,
        },
    ))
}

/// Number of hydrogens implied on an organic-subset atom by its bonds.
///
/// The smallest normal valence that fits the bond order sum is filled with
/// hydrogens. Aromatic `b`, `c`, `n` and `p` spend one more valence on the ring's
/// pi system and only use their lowest valence.
pub fn implicit_hydrogens(graph: &MoleculeGraph, node: NodeIndex) -> u32 {
    let atom = &graph[node];
    if atom.bracket {
        return 0;
    }
    let bond_sum: u32 = graph.edges(node).map(|edge| edge.weight().order()).sum();
    let valences = default_valences(&atom.symbol);

    if atom.aromatic {
        let pi = u32::from(matches!(atom.symbol.as_str(), "B" | "C" | "N" | "P"));
        return valences
            .first()
            .map_or(0, |&valence| valence.saturating_sub(bond_sum + pi));
    }
    valences
        .iter()
        .find(|&&valence| valence >= bond_sum)
        .map_or(0, |&valence| valence - bond_sum)
}

/// Counts every atom of the molecule, including explicit and implicit hydrogens.
pub fn molecular_formula(graph: &MoleculeGraph) -> ElementCount {
    let mut counts = ElementCount::new();
    for node in graph.node_indices() {
        let atom = &graph[node];
        counts.add(&atom.symbol, 1);
        let hydrogens = atom.hydrogens + implicit_hydrogens(graph, node);
        if hydrogens > 0 {
            counts.add("H", hydrogens as usize);
        }
    }
    counts
}

pub fn net_charge(graph: &MoleculeGraph) -> i32 {
    graph.node_weights().map(|atom| atom.charge).sum()
}

/// Derives the molecular formula of a SMILES string, e.g. `CCO` gives `C2H6O` and
/// `C[N+](C)(C)C` gives `C4H12N+`.
pub fn derived_formula(smiles: &str) -> Result<String, SmilesError> {
    let graph = parse_smiles(smiles)?;
    let mut formula = molecular_formula(&graph).to_string();
    match net_charge(&graph) {
        0 => {}
        1 => formula.push('+'),
        -1 => formula.push('-'),
        charge => {
            let _ = write!(formula, "{charge:+}");
        }
    }
    Ok(formula)
}

/// Interprets structures written as SMILES.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmilesInterpreter;

impl StructureInterpreter for SmilesInterpreter {
    fn interpret(&self, notation: &str) -> Result<String, InterpretError> {
        derived_formula(notation).map_err(InterpretError::from)
    }
}
