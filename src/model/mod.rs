//! Data types shared by the pipeline stages and plugins.
pub mod field;
pub mod issue;
pub mod range;
pub mod score;
pub mod table;

pub use field::normalize_header;
pub use field::FieldDef;
pub use issue::Severity;
pub use issue::ValidationIssue;
pub use range::TableRegion;
pub use score::DetectorOutput;
pub use score::RowKind;
pub use score::RowLabel;
pub use score::ScoreMap;
pub use table::ColumnMapping;
pub use table::ColumnMappingPatch;
pub use table::ColumnTarget;
pub use table::ExtractedTable;
pub use table::FieldAssignment;
pub use table::MappedColumn;
pub use table::NormalizedField;
pub use table::NormalizedPassthrough;
pub use table::NormalizedTable;
pub use table::PassthroughColumn;
pub use table::TableOrigin;
