use std::sync::Arc;

/// Which fields participate in a `TreeNode`'s identity. Affects only the
/// key `find_child_by_key` hashes on; it never changes counter semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// `(function_name, library_path)` — nodes merge across distinct call
    /// sites that happen to call the same function.
    ContextFree,
    /// `(function_name, library_path, offset_within_library)` — nodes are
    /// distinct per call site.
    ContextAware,
}

/// How a captured sample's count is attributed along the stack it came
/// from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Only the leaf of the stack receives `count`, in both its total and
    /// its self count.
    Exclusive,
    /// Every frame along the stack receives `count` in its total; self is
    /// not tracked.
    Inclusive,
    /// Every frame receives `count` in its total (inclusive accounting);
    /// the leaf additionally receives `count` in self.
    Both,
}

/// A `TreeNode`'s identity. The root is the single `Root` value; every
/// other node is a `Frame`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Root,
    Frame { function_name: Arc<str>, library_path: Arc<str>, offset: Option<u64> },
}

impl NodeKey {
    pub fn frame(mode: BuildMode, function_name: Arc<str>, library_path: Arc<str>, offset: u64) -> Self {
        match mode {
            BuildMode::ContextFree => NodeKey::Frame { function_name, library_path, offset: None },
            BuildMode::ContextAware => NodeKey::Frame { function_name, library_path, offset: Some(offset) },
        }
    }

    pub fn function_name(&self) -> Option<&str> {
        match self {
            NodeKey::Root => None,
            NodeKey::Frame { function_name, .. } => Some(function_name),
        }
    }

    pub fn library_path(&self) -> Option<&str> {
        match self {
            NodeKey::Root => None,
            NodeKey::Frame { library_path, .. } => Some(library_path),
        }
    }
}
