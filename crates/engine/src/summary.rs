//! Per-function summaries and their table rendering.

use std::fmt;

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use crate::formula::{Formula, FormulaMap};

/// The summary of one analyzed function: for every written state-variable
/// projection, the deduplicated `(expression, constraint)` pairs describing
/// its post-state, plus any warnings gathered along the way.
#[derive(Debug)]
pub struct FunctionSummary {
    pub contract: String,
    pub function: String,
    pub rows: FormulaMap,
    pub warnings: Vec<String>,
}

impl FunctionSummary {
    /// Looks a row up by its display name (`total`, `bal[a]`, ...).
    pub fn row(&self, name: &str) -> Option<&Formula> {
        self.rows.iter().find(|(var, _)| var.to_string() == name).map(|(_, formula)| formula)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Renders the summary as a table, one row per `(projection, pair)`.
    pub fn render(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["state variable", "expression", "constraint"]);
        for (var, formula) in &self.rows {
            for pair in formula.iter() {
                table.add_row(vec![
                    var.to_string(),
                    pair.expr.to_string(),
                    pair.constraint.to_string(),
                ]);
            }
        }
        table
    }
}

impl fmt::Display for FunctionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}::{}", self.contract, self.function)?;
        writeln!(f, "{}", self.render())?;
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}
