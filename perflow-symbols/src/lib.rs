//! Offset-to-symbol resolution: a cheap dynamic-linker query backed by a
//! DWARF line-info subprocess fallback, with a shared cache.

pub mod cache;
pub mod dwarf_tool;
pub mod dynamic_linker;
pub mod error;
pub mod resolver;
pub mod symbol_info;

pub use cache::{CacheStats, SymbolCache};
pub use error::SymbolError;
pub use resolver::SymbolResolver;
pub use symbol_info::SymbolInfo;
