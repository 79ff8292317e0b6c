pub mod answer_key;
pub mod cascade;
pub mod classify;
pub mod error;
pub mod href;
pub mod manifest;
pub mod options;
pub mod payload;
pub mod pipeline;
pub mod placeholder;
pub mod report;
pub mod rules;
pub mod verify;
pub mod xml;

pub use answer_key::{ItemOutcome, ItemReport, MappingBasis};
pub use cascade::CascadeOutcome;
pub use classify::{AssessmentFlavor, FlavorAudit, ResourceKind, classify};
pub use error::CartridgeError;
pub use href::{DuplicateRemoval, HrefChange, HrefChangeKind, RepairOutcome, canonicalize};
pub use manifest::{
    Item, ItemId, MANIFEST_FILE, Manifest, NamespaceBinding, NamespaceKind, Organization, Parent,
    Resource,
};
pub use options::{ConvertOptions, ExcludeKind};
pub use payload::PayloadTree;
pub use pipeline::{CheckSummary, Conversion, check, convert, transform, transform_with};
pub use placeholder::{HtmlPlaceholder, PlaceholderRenderer};
pub use report::{
    AnswerKeyRecord, AnswerKeyTally, AuditFinding, ChangeReport, RemovalReason, RemovedResource,
};
pub use rules::{TARGET_VERSION, ValueChange, VersionChange};
pub use verify::{AnswerKeyPolicy, Violation};
