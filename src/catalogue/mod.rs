use csv::{ReaderBuilder, StringRecord};
use lazy_static::lazy_static;
use serde::Serialize;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::*;

#[derive(Error, Debug)]
pub enum CatalogueError {
    #[error("Failed to read catalogue {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("Malformed catalogue CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Catalogue header is missing the '{0}' column")]
    MissingColumn(&'static str),
}

/// One named substance: the formula its author wrote and the structure it should match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogueEntry {
    pub name: String,
    pub authored_formula: String,
    pub structural_notation: String,
}

impl CatalogueEntry {
    pub fn new(
        name: impl Into<String>,
        authored_formula: impl Into<String>,
        structural_notation: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            authored_formula: authored_formula.into(),
            structural_notation: structural_notation.into(),
        }
    }
}

const NAME_COLUMN: &str = "name";
const FORMULA_COLUMN: &str = "formula";
const SMILES_COLUMN: &str = "smiles";

fn column(headers: &StringRecord, name: &'static str) -> Result<usize, CatalogueError> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(name))
        .ok_or(CatalogueError::MissingColumn(name))
}

/// Reads a catalogue from CSV text with `name`, `formula` and `smiles` columns.
///
/// Rows with an empty field are skipped with a warning.
pub fn read_catalogue(csv_data: &str) -> Result<Vec<CatalogueEntry>, CatalogueError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers = rdr.headers()?.clone();
    let name_column = column(&headers, NAME_COLUMN)?;
    let formula_column = column(&headers, FORMULA_COLUMN)?;
    let smiles_column = column(&headers, SMILES_COLUMN)?;

    let mut entries = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let field = |index: usize| record.get(index).unwrap_or("").trim();
        let (name, formula, smiles) = (
            field(name_column),
            field(formula_column),
            field(smiles_column),
        );
        if name.is_empty() || formula.is_empty() || smiles.is_empty() {
            warn!("Skipping catalogue record with an empty field: {:?}", record);
            continue;
        }
        entries.push(CatalogueEntry::new(name, formula, smiles));
    }
    debug!("Read {} catalogue entries", entries.len());
    Ok(entries)
}

/// Reads a catalogue CSV file from disk.
pub fn load_catalogue(path: impl AsRef<Path>) -> Result<Vec<CatalogueEntry>, CatalogueError> {
    let path = path.as_ref();
    let csv_data = fs::read_to_string(path)
        .map_err(|e| CatalogueError::Io(path.display().to_string(), e))?;
    let entries = read_catalogue(&csv_data)?;
    info!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}

lazy_static! {
    /// The catalogue shipped with the crate, parsed on first use.
    static ref BUNDLED_CATALOGUE: Vec<CatalogueEntry> = {
        let csv_data = include_str!("molecules.csv");
        read_catalogue(csv_data).unwrap_or_else(|e| {
            error!("Bundled catalogue is unreadable: {e}");
            Vec::new()
        })
    };
}

/// The catalogue shipped with the crate.
pub fn bundled_catalogue() -> &'static [CatalogueEntry] {
    &BUNDLED_CATALOGUE
}
