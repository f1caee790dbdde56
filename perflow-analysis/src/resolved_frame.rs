use std::sync::Arc;

use perflow_symbols::SymbolInfo;

/// One stack frame after resolving its raw address against a `LibraryMap`
/// snapshot and, optionally, a `SymbolResolver`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFrame {
    pub raw_address: u64,
    pub library_path: Arc<str>,
    pub offset_within_library: u64,
    pub function_name: Option<Arc<str>>,
    pub source_file: Option<Arc<str>>,
    pub line_number: Option<u32>,
}

impl ResolvedFrame {
    pub fn without_symbols(raw_address: u64, library_path: Arc<str>, offset_within_library: u64) -> Self {
        Self { raw_address, library_path, offset_within_library, function_name: None, source_file: None, line_number: None }
    }

    pub fn with_symbol(mut self, info: &SymbolInfo) -> Self {
        if info.is_resolved() {
            self.function_name = Some(info.function_name.clone());
            if info.has_source_location() {
                self.source_file = Some(info.source_file.clone());
                self.line_number = Some(info.line_number);
            }
        }
        self
    }

    /// The name `TreeNode` keying uses: the resolved function name if
    /// known, otherwise a synthesized `<lib>+0x...` label so unsymbolized
    /// frames still aggregate sensibly instead of each forming a unique
    /// unnamed node.
    pub fn node_function_name(&self) -> Arc<str> {
        match &self.function_name {
            Some(name) => name.clone(),
            None => Arc::from(format!("{}+0x{:x}", self.library_path, self.offset_within_library)),
        }
    }
}
