//! Built-in identifiers filtered out of read sets.

/// Free functions and constants provided by the script engine itself.
///
/// Method names are irrelevant here (member accesses are never reads); this
/// list covers names callable or readable in bare position.
const BUILTINS: &[&str] = &[
    "print",
    "debug",
    "type_of",
    "eval",
    "call",
    "curry",
    "is_def_var",
    "is_def_fn",
    "is_shared",
    "Fn",
    "range",
    "abs",
    "sign",
    "min",
    "max",
    "sqrt",
    "exp",
    "ln",
    "log",
    "sin",
    "cos",
    "tan",
    "floor",
    "ceiling",
    "round",
    "int",
    "float",
    "to_int",
    "to_float",
    "to_string",
    "to_char",
    "to_debug",
    "parse_int",
    "parse_float",
    "parse_json",
    "sleep",
    "timestamp",
    "PI",
    "E",
];

/// Whether `name` is a built-in identifier.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}
