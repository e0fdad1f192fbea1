// File: src/script/bundle.rs
// Purpose: Resolve and rewrite `import "..." as name;` statements of data scripts

use super::source_map::SourceMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

/// Extension of data-script modules
pub const MODULE_EXTENSION: &str = "rhai";

static SCRIPT_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"import\s+"(?P<specifier>[^"\n]+)"\s+as\s+[A-Za-z_][\w]*\s*;"#)
        .expect("script import pattern is valid")
});

/// Every imported specifier, in source order
pub fn import_specifiers(script: &str) -> Vec<String> {
    SCRIPT_IMPORT
        .captures_iter(script)
        .map(|captures| captures["specifier"].to_string())
        .collect()
}

/// Resolves a specifier against the project base
///
/// `./x`, `/x` and `x` all name `<base>/x.rhai`. The result must stay inside
/// the base; the error is a plain message.
pub fn resolve_import(base: &Path, specifier: &str) -> Result<PathBuf, String> {
    let trimmed = specifier.trim_start_matches("./").trim_start_matches('/');
    let mut relative = PathBuf::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(format!("import \"{specifier}\" escapes the project directory"));
                }
            }
            _ => return Err(format!("import \"{specifier}\" is not a project path")),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(format!("import \"{specifier}\" names no module"));
    }
    if relative.extension().is_none() {
        relative.set_extension(MODULE_EXTENSION);
    }
    Ok(base.join(relative))
}

/// Module id for a resolved import: its base-relative path with `/`
pub fn module_id(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// One import statement after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    pub specifier: String,
    pub path: PathBuf,
    pub id: String,
    /// One-based line of the statement
    pub line: usize,
    /// One-based column of the statement
    pub column: usize,
}

/// The script with every specifier replaced by its module id
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub text: String,
    pub imports: Vec<ResolvedImport>,
}

/// An import that failed to resolve, located in the authored text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Rewrites imports to canonical ids, recording column shifts in `map`
pub fn rewrite_imports(
    script: &str,
    base: &Path,
    mut map: Option<&mut SourceMap>,
) -> Result<Rewritten, ImportError> {
    let mut text = String::with_capacity(script.len());
    let mut imports = Vec::new();
    let mut cursor = 0;
    // Accumulated shift per line, since a line may hold several imports
    let mut line_delta: (usize, isize) = (0, 0);

    for captures in SCRIPT_IMPORT.captures_iter(script) {
        let specifier = &captures["specifier"];
        let specifier_range = captures.name("specifier").map(|m| m.range()).unwrap_or(0..0);
        let statement_start = captures.get(0).map(|m| m.start()).unwrap_or(0);

        let (line, column) = routekit_parser::line_column(script, statement_start);
        let path = resolve_import(base, specifier).map_err(|message| ImportError { line, column, message })?;
        let id = module_id(base, &path);

        text.push_str(&script[cursor..specifier_range.start]);
        text.push_str(&id);
        cursor = specifier_range.end;

        if line_delta.0 != line {
            line_delta = (line, 0);
        }
        let (_, specifier_column) = routekit_parser::line_column(script, specifier_range.end);
        let delta = id.len() as isize - specifier.len() as isize;
        if let Some(map) = map.as_deref_mut() {
            map.record_shift(line, (specifier_column as isize + line_delta.1) as usize, delta);
        }
        line_delta.1 += delta;

        imports.push(ResolvedImport {
            specifier: specifier.to_string(),
            path,
            id,
            line,
            column,
        });
    }
    text.push_str(&script[cursor..]);

    Ok(Rewritten { text, imports })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_import() {
        let base = Path::new("/site");
        assert_eq!(resolve_import(base, "lib/db").unwrap(), PathBuf::from("/site/lib/db.rhai"));
        assert_eq!(resolve_import(base, "./lib/db.rhai").unwrap(), PathBuf::from("/site/lib/db.rhai"));
        assert_eq!(resolve_import(base, "/lib/../util").unwrap(), PathBuf::from("/site/util.rhai"));
        assert!(resolve_import(base, "../secrets").unwrap_err().contains("escapes"));
        assert!(resolve_import(base, "lib/../../x").is_err());
    }

    #[test]
    fn test_import_specifiers() {
        let script = "import \"lib/db\" as db;\nimport \"./util\" as util;\ndb::load()";
        assert_eq!(import_specifiers(script), vec!["lib/db", "./util"]);
    }

    #[test]
    fn test_rewrite_records_shift() {
        let base = Path::new("/site");
        let mut map = SourceMap::new(0, 0);
        let rewritten = rewrite_imports("import \"db\" as db; db::x", base, Some(&mut map)).unwrap();

        assert_eq!(rewritten.text, "import \"db.rhai\" as db; db::x");
        assert_eq!(rewritten.imports[0].id, "db.rhai");
        // `db::x` starts at column 20 authored, 25 executed
        assert_eq!(map.to_authored(1, 25), (1, 20));
    }

    #[test]
    fn test_rewrite_reports_escape_location() {
        let error = rewrite_imports("let a = 1;\n  import \"../x\" as x;", Path::new("/site"), None).unwrap_err();
        assert_eq!((error.line, error.column), (2, 3));
        assert!(error.message.contains("escapes"));
    }
}
