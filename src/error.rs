//! Errors returned by structure generation and editing.

/// Error returned when a rule tree or an edit request cannot be honoured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    /// Two rules in the tree share `id`, so lookups by id would be ambiguous.
    DuplicateRuleId { id: u32 },
    /// The top-level rule produces sprouts; it must produce branches.
    RootIsSprout,
    /// No generated structure carries `id`.
    UnknownStructure { id: u32 },
}

impl std::fmt::Display for StructureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureError::DuplicateRuleId { id } => {
                write!(f, "rule id {id} appears more than once in the rule tree")
            }
            StructureError::RootIsSprout => {
                write!(f, "the root rule must produce branches, not sprouts")
            }
            StructureError::UnknownStructure { id } => {
                write!(f, "no generated structure has id {id}")
            }
        }
    }
}

impl std::error::Error for StructureError {}
