//! Symbol export for host-side autocomplete.
//!
//! Built from the same tables the parser and dispatcher use, so the listing
//! cannot drift from what the language accepts.

use serde::Serialize;

use super::builtins::BUILTINS;
use super::stmt::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Keyword,
    Builtin,
    Function,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Display form, e.g. `split(separator)`.
    pub signature: String,
    pub summary: String,
}

const KEYWORDS: &[(&str, &str, &str)] = &[
    ("map", "[pre ::] map [:: post]", "run the block per element, collect the results"),
    ("filter", "[pre ::] filter [:: post]", "keep elements whose block yields true"),
    ("sortBy", "[pre ::] sortBy [:: post]", "order elements by their block result"),
    ("sumBy", "[pre ::] sumBy [:: post]", "add up the block results"),
    ("pivot", "[pre ::] pivot [:: post]", "group elements by their block result"),
    ("do", "[pre ::] do [:: post]", "run the block once on the value"),
    ("function", "function name(params)", "define a function from the indented block"),
    ("exit", "exit", "stop the run"),
    ("stream", "stream", "the current value"),
    ("index", "index", "position within the enclosing fan-out"),
    ("true", "true", "boolean literal"),
    ("false", "false", "boolean literal"),
];

/// Keywords and built-ins.
pub fn symbols() -> Vec<Symbol> {
    let keywords = KEYWORDS.iter().map(|(name, signature, summary)| Symbol {
        name: (*name).to_owned(),
        kind: SymbolKind::Keyword,
        signature: (*signature).to_owned(),
        summary: (*summary).to_owned(),
    });
    let builtins = BUILTINS.iter().map(|b| Symbol {
        name: b.name.to_owned(),
        kind: SymbolKind::Builtin,
        signature: b.signature(),
        summary: b.summary.to_owned(),
    });
    keywords.chain(builtins).collect()
}

impl Program {
    /// [`symbols`] plus this script's functions and stored locals.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut functions: Vec<Symbol> = self
            .functions
            .values()
            .map(|def| Symbol {
                name: def.name.clone(),
                kind: SymbolKind::Function,
                signature: format!("{}({})", def.name, def.params.join(", ")),
                summary: "user-defined function".to_owned(),
            })
            .collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));

        let locals = self.locals.iter().map(|name| Symbol {
            name: name.clone(),
            kind: SymbolKind::Local,
            signature: name.clone(),
            summary: "stored local".to_owned(),
        });

        let mut all = symbols();
        all.extend(functions);
        all.extend(locals);
        all
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
