use std::sync::Arc;

/// A resolved (function, source file, line) triplet for one (library,
/// offset) pair. An empty `function_name` means the offset could not be
/// resolved at all; a known function with unknown source location has a
/// non-empty `function_name` but an empty `source_file` and `line == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SymbolInfo {
    pub function_name: Arc<str>,
    pub source_file: Arc<str>,
    pub line_number: u32,
}

impl SymbolInfo {
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn function_only(function_name: impl Into<Arc<str>>) -> Self {
        Self { function_name: function_name.into(), source_file: Arc::from(""), line_number: 0 }
    }

    pub fn is_resolved(&self) -> bool {
        !self.function_name.is_empty()
    }

    pub fn has_source_location(&self) -> bool {
        !self.source_file.is_empty() && self.line_number != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_is_all_empty() {
        let info = SymbolInfo::unresolved();
        assert!(!info.is_resolved());
        assert!(!info.has_source_location());
    }

    #[test]
    fn function_only_has_no_source_location() {
        let info = SymbolInfo::function_only("foo");
        assert!(info.is_resolved());
        assert!(!info.has_source_location());
    }
}
