//! Program model and source parsing.
//!
//! Vela keeps the managed-language surface deliberately small: a library is
//! a sequence of `import` directives and `fn` declarations, and a function
//! body is a flat statement list. This is just enough surface for an entry
//! point to print, schedule work on the cooperative loop, signal failure,
//! and report an exit code — everything the embedder observes.

use std::collections::BTreeMap;

use crate::error::VmError;

/// A single statement in a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// `print "text";` — write a line of output.
    Print(String),
    /// `call f;` — invoke `f` synchronously.
    Call(String),
    /// `schedule f;` — post `f` as a task on the context's loop.
    Schedule(String),
    /// `defer f;` — post `f` on the microtask queue.
    Defer(String),
    /// `fail "reason";` — signal failure to the embedder.
    Fail(String),
    /// `return N;` — finish with an exit code.
    Return(i32),
}

/// A named function with its statement list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub body: Vec<Stmt>,
}

/// A parsed source library: one URL, its imports, and its functions.
#[derive(Debug, Clone)]
pub struct Library {
    pub url: String,
    pub imports: Vec<String>,
    pub functions: Vec<Function>,
}

/// A loaded program: the flat function table merged from every library,
/// plus the list of library URLs in load order.
///
/// Once sealed (see [`crate::loader::finalize`]) the program accepts no
/// further libraries.
#[derive(Debug, Default)]
pub struct Program {
    libraries: Vec<String>,
    functions: BTreeMap<String, Function>,
    sealed: bool,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a program from decoded parts (snapshot deserialization).
    pub(crate) fn from_parts(libraries: Vec<String>, functions: Vec<Function>) -> Self {
        let functions = functions
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();
        Self {
            libraries,
            functions,
            sealed: true,
        }
    }

    /// Merge a parsed library into the program.
    pub fn add_library(&mut self, library: Library) -> Result<(), VmError> {
        if self.sealed {
            return Err(VmError::Contract(
                "library added after loading was finalized".to_string(),
            ));
        }
        for function in &library.functions {
            if self.functions.contains_key(&function.name) {
                return Err(VmError::DuplicateFunction {
                    name: function.name.clone(),
                    library: library.url.clone(),
                });
            }
        }
        for function in library.functions {
            self.functions.insert(function.name.clone(), function);
        }
        self.libraries.push(library.url);
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Functions in name order.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Library URLs in load order.
    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    /// Drop every function whose name is not in `keep`.
    pub(crate) fn retain_functions(&mut self, keep: &std::collections::BTreeSet<String>) {
        self.functions.retain(|name, _| keep.contains(name));
    }
}

/// Parse one library's source text.
pub fn parse_library(url: &str, source: &str) -> Result<Library, VmError> {
    let mut imports = Vec::new();
    let mut functions = Vec::new();
    let mut current: Option<(String, Vec<Stmt>)> = None;

    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        let lineno = index + 1;
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        if let Some(rest) = line.strip_prefix("import ") {
            if current.is_some() {
                return Err(parse_error(lineno, "import inside a function body"));
            }
            let rest = rest
                .strip_suffix(';')
                .ok_or_else(|| parse_error(lineno, "missing ';' after import"))?;
            let target = parse_string_literal(rest.trim())
                .ok_or_else(|| parse_error(lineno, "import expects a quoted URL"))?;
            imports.push(target);
        } else if let Some(rest) = line.strip_prefix("fn ") {
            if current.is_some() {
                return Err(parse_error(lineno, "nested function declaration"));
            }
            let name = rest
                .strip_suffix('{')
                .ok_or_else(|| parse_error(lineno, "expected '{' after function name"))?
                .trim();
            if name.is_empty() || !name.chars().all(is_identifier_char) {
                return Err(parse_error(lineno, "invalid function name"));
            }
            current = Some((name.to_string(), Vec::new()));
        } else if line == "}" {
            let (name, body) = current
                .take()
                .ok_or_else(|| parse_error(lineno, "unmatched '}'"))?;
            functions.push(Function { name, body });
        } else {
            let Some((_, body)) = current.as_mut() else {
                return Err(parse_error(lineno, "statement outside a function"));
            };
            body.push(parse_statement(line, lineno)?);
        }
    }

    if current.is_some() {
        return Err(parse_error(
            source.lines().count(),
            "unterminated function body",
        ));
    }

    Ok(Library {
        url: url.to_string(),
        imports,
        functions,
    })
}

fn parse_statement(line: &str, lineno: usize) -> Result<Stmt, VmError> {
    let line = line
        .strip_suffix(';')
        .ok_or_else(|| parse_error(lineno, "missing ';'"))?
        .trim();
    let (keyword, rest) = match line.split_once(' ') {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    };
    match keyword {
        "print" | "fail" => {
            let text = parse_string_literal(rest)
                .ok_or_else(|| parse_error(lineno, "expected a quoted string"))?;
            Ok(if keyword == "print" {
                Stmt::Print(text)
            } else {
                Stmt::Fail(text)
            })
        }
        "call" | "schedule" | "defer" => {
            if rest.is_empty() || !rest.chars().all(is_identifier_char) {
                return Err(parse_error(lineno, "expected a function name"));
            }
            let name = rest.to_string();
            Ok(match keyword {
                "call" => Stmt::Call(name),
                "schedule" => Stmt::Schedule(name),
                _ => Stmt::Defer(name),
            })
        }
        "return" => {
            let code = rest
                .parse::<i32>()
                .map_err(|_| parse_error(lineno, "return expects an integer"))?;
            Ok(Stmt::Return(code))
        }
        other => Err(parse_error(lineno, &format!("unknown statement '{other}'"))),
    }
}

fn parse_string_literal(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    // No escape sequences in the surface syntax.
    if inner.contains('"') {
        return None;
    }
    Some(inner.to_string())
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_error(line: usize, message: &str) -> VmError {
    VmError::Parse {
        line,
        message: message.to_string(),
    }
}
