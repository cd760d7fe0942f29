//! Script execution for imperative cells.
//!
//! One `ScriptExecutor` holds the whole interpreter state of a notebook: the
//! persistent scope (the globals bag), the accumulated function library, and
//! the captured print buffer. Top-level bindings persist across cells;
//! functions defined in one cell stay callable from later cells.

use std::cell::RefCell;
use std::rc::Rc;

use rhai::{AST, Dynamic, Engine, ParseError, Scope};

use rill_core::ipc::KernelErrorKind;

/// Result of evaluating one imperative cell.
pub struct ScriptOutcome {
    /// Captured print/debug output.
    pub stdout: String,
    /// Value of the trailing expression, if the cell ended in one.
    pub value: Option<Dynamic>,
    pub error: Option<(KernelErrorKind, String)>,
}

/// The per-notebook script interpreter.
pub struct ScriptExecutor {
    engine: Engine,
    scope: Scope<'static>,
    /// Function definitions accumulated from successfully compiled cells.
    lib: AST,
    stdout: Rc<RefCell<String>>,
}

impl ScriptExecutor {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        let stdout = Rc::new(RefCell::new(String::new()));

        let sink = stdout.clone();
        engine.on_print(move |text| {
            let mut buffer = sink.borrow_mut();
            buffer.push_str(text);
            buffer.push('\n');
        });
        let sink = stdout.clone();
        engine.on_debug(move |text, _source, _pos| {
            let mut buffer = sink.borrow_mut();
            buffer.push_str(text);
            buffer.push('\n');
        });

        Self {
            engine,
            scope: Scope::new(),
            lib: AST::empty(),
            stdout,
        }
    }

    /// Evaluate a cell against the notebook scope.
    ///
    /// A trailing expression (no final semicolon) yields the captured value;
    /// statement-only cells yield none. Top-level bindings land in the scope
    /// and survive the call.
    pub fn execute(&mut self, code: &str) -> ScriptOutcome {
        self.stdout.borrow_mut().clear();

        let ast = match self.engine.compile(code) {
            Ok(ast) => ast,
            Err(e) => {
                return ScriptOutcome {
                    stdout: String::new(),
                    value: None,
                    error: Some((KernelErrorKind::SyntaxError, format_parse_error(code, &e))),
                };
            }
        };

        // Functions from earlier cells stay callable; this cell's definitions
        // join the library for later ones.
        let unit = self.lib.merge(&ast);
        self.lib = self.lib.merge(&ast.clone_functions_only());

        match self.engine.eval_ast_with_scope::<Dynamic>(&mut self.scope, &unit) {
            Ok(value) => ScriptOutcome {
                stdout: self.take_stdout(),
                value: (!value.is_unit()).then_some(value),
                error: None,
            },
            Err(e) => ScriptOutcome {
                stdout: self.take_stdout(),
                value: None,
                error: Some((
                    KernelErrorKind::RuntimeError,
                    format!("RuntimeError: {e}"),
                )),
            },
        }
    }

    fn take_stdout(&self) -> String {
        std::mem::take(&mut *self.stdout.borrow_mut())
    }

    /// Whether a top-level binding exists.
    pub fn has_var(&self, name: &str) -> bool {
        self.scope.contains(name)
    }

    /// A top-level binding as JSON, falling back to its display form for
    /// values without a JSON representation.
    pub fn get_json(&self, name: &str) -> Option<serde_json::Value> {
        let value = self.scope.get(name)?;
        match rhai::serde::from_dynamic(value) {
            Ok(json) => Some(json),
            Err(_) => Some(serde_json::Value::String(value.to_string())),
        }
    }

    /// Remove bindings from the scope (a deleted cell's writes).
    pub fn evict(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let mut retained = Scope::new();
        for (name, constant, value) in self.scope.iter() {
            if names.iter().any(|n| n == name) {
                continue;
            }
            if constant {
                retained.push_constant_dynamic(name.to_string(), value);
            } else {
                retained.push_dynamic(name.to_string(), value);
            }
        }
        self.scope = retained;
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// `SyntaxError at line N: <msg>`, followed by the offending source line and
/// a caret pointing at the column when positions are available.
fn format_parse_error(code: &str, error: &ParseError) -> String {
    let message = error.0.to_string();
    let Some(line) = error.1.line() else {
        return format!("SyntaxError: {message}");
    };
    let mut out = format!("SyntaxError at line {line}: {message}");
    if let Some(source_line) = code.lines().nth(line - 1) {
        out.push('\n');
        out.push_str(source_line);
        if let Some(col) = error.1.position() {
            out.push('\n');
            out.push_str(&" ".repeat(col.saturating_sub(1)));
            out.push('^');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_cell_yields_no_value() {
        let mut executor = ScriptExecutor::new();
        let outcome = executor.execute("let x = 10;");
        assert!(outcome.error.is_none());
        assert!(outcome.value.is_none());
        assert_eq!(executor.get_json("x"), Some(serde_json::json!(10)));
    }

    #[test]
    fn test_trailing_expression_is_captured() {
        let mut executor = ScriptExecutor::new();
        executor.execute("let x = 10;");
        let outcome = executor.execute("x * 2");
        assert_eq!(outcome.value.unwrap().as_int().unwrap(), 20);
    }

    #[test]
    fn test_print_is_captured_per_cell() {
        let mut executor = ScriptExecutor::new();
        let outcome = executor.execute("print(\"hello\"); print(\"world\");");
        assert_eq!(outcome.stdout, "hello\nworld\n");
        // The buffer does not leak into the next cell.
        let outcome = executor.execute("1 + 1");
        assert!(outcome.stdout.is_empty());
    }

    #[test]
    fn test_bindings_persist_across_cells() {
        let mut executor = ScriptExecutor::new();
        executor.execute("let x = 10;");
        executor.execute("let y = x * 2;");
        let outcome = executor.execute("let z = y + 5; z");
        assert_eq!(outcome.value.unwrap().as_int().unwrap(), 25);
        assert_eq!(executor.get_json("z"), Some(serde_json::json!(25)));
    }

    #[test]
    fn test_functions_persist_across_cells() {
        let mut executor = ScriptExecutor::new();
        let outcome = executor.execute("fn double(n) { n * 2 }");
        assert!(outcome.error.is_none());
        let outcome = executor.execute("double(21)");
        assert_eq!(outcome.value.unwrap().as_int().unwrap(), 42);
    }

    #[test]
    fn test_syntax_error_has_line_and_caret() {
        let mut executor = ScriptExecutor::new();
        let outcome = executor.execute("let x = ;");
        let (kind, message) = outcome.error.unwrap();
        assert_eq!(kind, KernelErrorKind::SyntaxError);
        assert!(message.starts_with("SyntaxError at line 1:"), "{message}");
        assert!(message.contains('^'), "{message}");
    }

    #[test]
    fn test_runtime_error_reports_position() {
        let mut executor = ScriptExecutor::new();
        let outcome = executor.execute("nonexistent + 1");
        let (kind, message) = outcome.error.unwrap();
        assert_eq!(kind, KernelErrorKind::RuntimeError);
        assert!(message.starts_with("RuntimeError:"), "{message}");
    }

    #[test]
    fn test_empty_cell_is_a_noop_success() {
        let mut executor = ScriptExecutor::new();
        let outcome = executor.execute("");
        assert!(outcome.error.is_none());
        assert!(outcome.value.is_none());
        assert!(outcome.stdout.is_empty());
    }

    #[test]
    fn test_evict_removes_bindings() {
        let mut executor = ScriptExecutor::new();
        executor.execute("let x = 1; let y = 2;");
        executor.evict(&["x".to_string()]);
        assert!(!executor.has_var("x"));
        assert!(executor.has_var("y"));
    }

    #[test]
    fn test_failed_cell_leaves_earlier_bindings() {
        let mut executor = ScriptExecutor::new();
        executor.execute("let x = 1;");
        let outcome = executor.execute("1 / 0");
        assert!(outcome.error.is_some());
        assert!(executor.has_var("x"));
    }
}
