//! Named example snippets offered next to each editor.

use std::collections::BTreeMap;

/// Built-in examples: (name, snippet).
const BUILTIN_EXAMPLES: &[(&str, &str)] = &[
    (
        "hello",
        r#"# Hello World
print("Hello, World!")

# Basic arithmetic
a = 10
b = 3
print(f"{a} + {b} = {a + b}")
print(f"{a} - {b} = {a - b}")"#,
    ),
    (
        "fibonacci",
        r#"# Fibonacci numbers
def fibonacci(n):
    """Return the n-th Fibonacci number."""
    if n <= 1:
        return n
    a, b = 0, 1
    for _ in range(2, n + 1):
        a, b = b, a + b
    return b

# Print the first ten
for i in range(10):
    print(f"fib({i}) = {fibonacci(i)}")"#,
    ),
    (
        "calculator",
        r#"# A tiny calculator
def calculate(a, b, op):
    if op == '+':
        return a + b
    elif op == '-':
        return a - b
    elif op == '*':
        return a * b
    elif op == '/':
        return a / b if b != 0 else "Error: division by zero"
    else:
        return "Error: unsupported operator"

print(calculate(10, 5, '+'))  # 15
print(calculate(10, 5, '-'))  # 5
print(calculate(10, 5, '*'))  # 50
print(calculate(10, 5, '/'))  # 2.0"#,
    ),
];

/// Static mapping from example name to snippet text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleTable {
    entries: BTreeMap<String, String>,
}

impl ExampleTable {
    /// Create a table from explicit entries.
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// The examples shipped with Sprout.
    pub fn builtin() -> Self {
        Self::new(builtin_entries())
    }

    /// Look up an example by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Example names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExampleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Built-in examples as an owned map (used as the config default).
pub(crate) fn builtin_entries() -> BTreeMap<String, String> {
    BUILTIN_EXAMPLES
        .iter()
        .map(|(name, code)| (name.to_string(), code.to_string()))
        .collect()
}
