// File: src/imports.rs
// Purpose: Parse module import statements out of component scripts and JS modules

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static IMPORT_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*import\s+(?:(?P<clause>[\w$]+(?:\s*,\s*\{[^}]*\})?|\{[^}]*\}|\*\s*as\s+[\w$]+)\s+from\s+)?["'](?P<specifier>[^"'\n]+)["'][ \t]*;?"#,
    )
    .expect("import pattern is valid")
});

/// One `import` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Module specifier as written
    pub specifier: String,
    pub clause: ImportClause,
    /// Byte range of the whole statement in the parsed source
    pub span: Range<usize>,
}

/// What an import statement binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportClause {
    /// `import 'x';`
    SideEffect,
    /// `import X from 'x';`
    Default(String),
    /// `import { a, b as c } from 'x';`
    Named(Vec<NamedImport>),
    /// `import X, { a } from 'x';`
    DefaultAndNamed(String, Vec<NamedImport>),
    /// `import * as X from 'x';`
    Namespace(String),
}

/// `imported as local`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedImport {
    pub imported: String,
    pub local: String,
}

impl Import {
    /// The default binding, if the statement has one
    pub fn default_binding(&self) -> Option<&str> {
        match &self.clause {
            ImportClause::Default(name) | ImportClause::DefaultAndNamed(name, _) => Some(name),
            _ => None,
        }
    }
}

/// Parses every top-level import statement of a module source (pure function)
///
/// ```
/// use routekit_parser::{parse_imports, ImportClause};
///
/// let imports = parse_imports("import Counter from './Counter.component';\nlet x = 1;");
/// assert_eq!(imports.len(), 1);
/// assert_eq!(imports[0].specifier, "./Counter.component");
/// assert_eq!(imports[0].clause, ImportClause::Default("Counter".to_string()));
/// ```
pub fn parse_imports(source: &str) -> Vec<Import> {
    IMPORT_STATEMENT
        .captures_iter(source)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let specifier = captures.name("specifier")?.as_str().to_string();
            let clause = captures
                .name("clause")
                .map(|clause| parse_clause(clause.as_str()))
                .unwrap_or(ImportClause::SideEffect);

            Some(Import {
                specifier,
                clause,
                span: whole.range(),
            })
        })
        .collect()
}

fn parse_clause(clause: &str) -> ImportClause {
    let clause = clause.trim();

    if let Some(namespace) = clause.strip_prefix('*') {
        let name = namespace.trim().trim_start_matches("as").trim();
        return ImportClause::Namespace(name.to_string());
    }

    match clause.split_once('{') {
        Some((default, named)) => {
            let named = parse_named(named.trim_end_matches('}'));
            let default = default.trim().trim_end_matches(',').trim();
            if default.is_empty() {
                ImportClause::Named(named)
            } else {
                ImportClause::DefaultAndNamed(default.to_string(), named)
            }
        }
        None => ImportClause::Default(clause.to_string()),
    }
}

fn parse_named(list: &str) -> Vec<NamedImport> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(" as ") {
            Some((imported, local)) => NamedImport {
                imported: imported.trim().to_string(),
                local: local.trim().to_string(),
            },
            None => NamedImport {
                imported: entry.to_string(),
                local: entry.to_string(),
            },
        })
        .collect()
}

/// Removes import statements from a source, keeping its line structure
pub fn strip_imports(source: &str, imports: &[Import]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;

    for import in imports {
        out.push_str(&source[cursor..import.span.start]);
        out.push_str(&"\n".repeat(source[import.span.clone()].matches('\n').count()));
        cursor = import.span.end;
    }

    out.push_str(&source[cursor..]);
    out
}
