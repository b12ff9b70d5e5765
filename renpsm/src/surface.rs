//! Surface syntax of the rule language.

use tracing::{debug, instrument};

use crate::core::symbols::SymbolTable;
use crate::core::{Limits, Program};
use crate::files::FileId;
use crate::reporting::Message;

pub mod lexer;
pub mod parser;

/// Parse a program, folding constants and binding constant assignments in
/// `symbols` along the way.
#[instrument(skip_all, fields(file_id = %file_id))]
pub fn parse_program(
    file_id: FileId,
    source: &str,
    symbols: &mut SymbolTable,
    limits: &Limits,
) -> Result<Program, Message> {
    let program = parser::Parser::new(file_id, source, symbols, limits)?.program()?;
    debug!(
        model = %program.model,
        definitions = program.definitions.len(),
        bindings = symbols.len(),
        "parsed program"
    );
    Ok(program)
}
