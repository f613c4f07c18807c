use crate::ast::DEFAULT_MAX_DEPTH;

/// Options shared by every evaluation an `Evaluator` performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalOptions {
    /// Prefix of generated type names; a per-process counter is appended.
    pub type_name_prefix: String,
    /// Name of the synthetic type's entry method.
    pub entry_method: String,
    /// Accept multi-statement fragments (`(do ...)` or several forms).
    pub allow_blocks: bool,
    /// Operand stack limit for generated code; a method that needs more is
    /// refused when it is loaded.
    pub max_operand_stack: usize,
    /// Deepest list or vector nesting a fragment may have.
    pub max_nesting_depth: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            type_name_prefix: "Fragment".to_string(),
            entry_method: "run".to_string(),
            allow_blocks: false,
            max_operand_stack: 1024,
            max_nesting_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EvalOptions {
    pub fn with_type_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.type_name_prefix = prefix.into();
        self
    }

    pub fn with_entry_method(mut self, name: impl Into<String>) -> Self {
        self.entry_method = name.into();
        self
    }

    pub fn with_blocks(mut self, allow: bool) -> Self {
        self.allow_blocks = allow;
        self
    }

    pub fn with_max_operand_stack(mut self, limit: usize) -> Self {
        self.max_operand_stack = limit;
        self
    }

    pub fn with_max_nesting_depth(mut self, limit: usize) -> Self {
        self.max_nesting_depth = limit;
        self
    }
}
