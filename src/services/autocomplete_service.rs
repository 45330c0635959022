use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::models::AutocompleteResponse;

const PYTHON_RULES: &[(&str, &str)] = &[
    (r"def\s+(\w*)$", "def function_name(self, arg1, arg2):\n    \"\"\"Function description.\"\"\"\n    pass"),
    (r"class\s+(\w*)$", "class ClassName:\n    \"\"\"Class description.\"\"\"\n    \n    def __init__(self):\n        pass"),
    (r"if\s+$", "if condition:\n    pass\nelse:\n    pass"),
    (r"for\s+$", "for item in items:\n    pass"),
    (r"while\s+$", "while condition:\n    pass"),
    (r"try\s*:?\s*$", "try:\n    pass\nexcept Exception as e:\n    print(f\"Error: {e}\")"),
    (r"import\s+$", "import module_name"),
    (r"from\s+$", "from module import function"),
    (r"async\s+def\s+$", "async def async_function():\n    await some_coroutine()"),
    (r"print\s*\(\s*$", "print(f\"Message: {variable}\")"),
    (r"return\s+$", "return result"),
    (r"raise\s+$", "raise ValueError(\"Error message\")"),
    (r"with\s+$", "with open(filename, 'r') as f:\n    content = f.read()"),
    (r"lambda\s+$", "lambda x: x * 2"),
    (r"#\s*TODO\s*$", "# TODO: Implement this feature"),
    (r"\[\s*$", "[item for item in items if condition]"),
    (r"\{\s*$", "{key: value for key, value in items.items()}"),
];

const JS_RULES: &[(&str, &str)] = &[
    (r"function\s+$", "function functionName(param) {\n  return param;\n}"),
    (r"const\s+$", "const variableName = value;"),
    (r"let\s+$", "let variableName = value;"),
    (r"if\s*\(\s*$", "if (condition) {\n  // code\n}"),
    (r"for\s*\(\s*$", "for (let i = 0; i < array.length; i++) {\n  // code\n}"),
    (r"=>\s*$", "=> {\n  return result;\n}"),
    (r"async\s+$", "async function asyncFunction() {\n  await somePromise();\n}"),
    (r"import\s+$", "import { module } from 'package';"),
    (r"export\s+$", "export default ComponentName;"),
    (r"console\.\s*$", "console.log('Debug:', variable);"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Python,
    JavaScript,
}

impl Family {
    fn of(language: &str) -> Self {
        match language.to_lowercase().as_str() {
            "javascript" | "js" | "typescript" | "ts" => Family::JavaScript,
            _ => Family::Python,
        }
    }

    fn rules(self) -> &'static [(Regex, &'static str)] {
        static PYTHON: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
        static JS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
        match self {
            Family::Python => PYTHON.get_or_init(|| compile(PYTHON_RULES)),
            Family::JavaScript => JS.get_or_init(|| compile(JS_RULES)),
        }
    }
}

fn compile(rules: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    // Patterns are constants; one that fails to compile is skipped.
    rules
        .iter()
        .filter_map(|(pattern, template)| Regex::new(pattern).ok().map(|re| (re, *template)))
        .collect()
}

/// Rule-based completion for the line the cursor is on.
///
/// `cursor_position` counts characters and is clamped to the length of `code`.
/// The returned insert position is always the requested cursor position.
pub fn suggest(code: &str, cursor_position: usize, language: &str) -> AutocompleteResponse {
    let before_cursor: String = code.chars().take(cursor_position).collect();
    let current_line = before_cursor.rsplit('\n').next().unwrap_or_default();
    let family = Family::of(language);

    let suggestion = match_rule(current_line.trim(), family).unwrap_or_else(|| fallback(current_line, family));
    debug!("Autocomplete ({:?}) for {:?}: {} chars", family, current_line, suggestion.len());

    AutocompleteResponse {
        suggestion: suggestion.to_string(),
        insert_position: cursor_position,
    }
}

fn match_rule(line: &str, family: Family) -> Option<&'static str> {
    family
        .rules()
        .iter()
        .find(|(re, _)| re.is_match(line))
        .map(|(_, template)| *template)
}

fn fallback(line: &str, family: Family) -> &'static str {
    let line = line.trim().to_lowercase();
    let python = family == Family::Python;

    if line.ends_with("pr") {
        if python { "print('Hello, World!')" } else { "console.log('Hello, World!');" }
    } else if line.ends_with("de") {
        if python { "def new_function():\n    pass" } else { "function newFunction() {\n  return;\n}" }
    } else if line.ends_with("cl") {
        if python {
            "class NewClass:\n    def __init__(self):\n        pass"
        } else {
            "class NewClass {\n  constructor() {}\n}"
        }
    } else if line.ends_with("im") {
        if python { "import os" } else { "import { } from '';" }
    } else if python {
        "# Your code here"
    } else {
        "// Your code here"
    }
}
