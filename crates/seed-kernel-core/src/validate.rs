//! Structural validation of seed text.
//!
//! All checks run and accumulate; nothing here fails fast or returns `Err`.
//! Warnings never affect [`ValidationResult::valid`].

use serde::{Deserialize, Serialize};

use crate::document::{self, Document, CORE_BLOCK, MEM_BLOCK, REQUIRED_BLOCKS, STATE_BLOCK};
use crate::events::{EventSink, KernelEvent};

/// Keys in the state block that count as a mood/state indicator.
const STATE_INDICATOR_KEYS: [&str; 4] = ["state", "zustand", "mood", "stimmung"];

const MIN_CORE_VALUES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    /// Above this size a warning is reported.
    pub soft_limit_bytes: usize,
    /// Above this size the document is rejected.
    pub hard_limit_bytes: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            soft_limit_bytes: 5 * 1024,
            hard_limit_bytes: 8 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    EmptyInput,
    MissingHeaderField,
    MissingBlock,
    EmptyCoreValues,
    FewCoreValues,
    MissingStateIndicator,
    UntaggedMemories,
    UnclosedBlock,
    ApproachingSizeLimit,
    SizeLimitExceeded,
}

impl IssueCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyInput => "empty_input",
            Self::MissingHeaderField => "missing_header_field",
            Self::MissingBlock => "missing_block",
            Self::EmptyCoreValues => "empty_core_values",
            Self::FewCoreValues => "few_core_values",
            Self::MissingStateIndicator => "missing_state_indicator",
            Self::UntaggedMemories => "untagged_memories",
            Self::UnclosedBlock => "unclosed_block",
            Self::ApproachingSizeLimit => "approaching_size_limit",
            Self::SizeLimitExceeded => "size_limit_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ValidationIssue {
    fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            block: None,
            field: None,
        }
    }

    fn in_block(mut self, block: &str) -> Self {
        self.block = Some(block.to_string());
        self
    }

    fn on_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub size_bytes: usize,
}

impl ValidationResult {
    #[must_use]
    pub fn has_error(&self, code: IssueCode) -> bool {
        self.errors.iter().any(|issue| issue.code == code)
    }

    #[must_use]
    pub fn has_warning(&self, code: IssueCode) -> bool {
        self.warnings.iter().any(|issue| issue.code == code)
    }
}

#[must_use]
pub fn validate(text: &str) -> ValidationResult {
    validate_with(text, &ValidationLimits::default())
}

#[must_use]
pub fn validate_with(text: &str, limits: &ValidationLimits) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if text.trim().is_empty() {
        errors.push(ValidationIssue::new(
            IssueCode::EmptyInput,
            "document MUST be a non-empty string",
        ));
        return ValidationResult {
            valid: false,
            errors,
            warnings,
            size_bytes: text.len(),
        };
    }

    let document = document::parse(text);
    check_header(&document, &mut errors);
    check_blocks(&document, &mut errors, &mut warnings);
    check_size(document.size_bytes, limits, &mut errors, &mut warnings);

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
        size_bytes: document.size_bytes,
    }
}

fn check_header(document: &Document, errors: &mut Vec<ValidationIssue>) {
    let header = &document.header;
    let missing = [
        ("version", header.version.is_none()),
        ("born", header.created_at.is_none()),
        ("sessions", header.session_count.is_none()),
    ];
    for (field, absent) in missing {
        if absent {
            errors.push(
                ValidationIssue::new(
                    IssueCode::MissingHeaderField,
                    format!("header MUST contain a valid `{field}` field"),
                )
                .on_field(field),
            );
        }
    }
}

fn check_blocks(
    document: &Document,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    for name in &document.unterminated_blocks {
        errors.push(
            ValidationIssue::new(
                IssueCode::UnclosedBlock,
                format!("block @{name} is never closed; the document looks truncated"),
            )
            .in_block(name),
        );
    }

    for required in REQUIRED_BLOCKS {
        if !document.has_block(required) {
            let spellings = document::block_spellings(required)
                .iter()
                .map(|name| format!("@{name}"))
                .collect::<Vec<_>>()
                .join(" or ");
            errors.push(
                ValidationIssue::new(
                    IssueCode::MissingBlock,
                    format!("required block {spellings} is missing"),
                )
                .in_block(required),
            );
        }
    }

    if let Some(core) = document.block(CORE_BLOCK) {
        let numbered = core.numbered_entries().len();
        if numbered == 0 {
            errors.push(
                ValidationIssue::new(
                    IssueCode::EmptyCoreValues,
                    "core block MUST contain at least one numbered value",
                )
                .in_block(CORE_BLOCK),
            );
        } else if numbered < MIN_CORE_VALUES {
            warnings.push(
                ValidationIssue::new(
                    IssueCode::FewCoreValues,
                    format!("core block has only {numbered} numbered value(s)"),
                )
                .in_block(CORE_BLOCK),
            );
        }
    }

    if let Some(state) = document.block(STATE_BLOCK) {
        if state.value_of(&STATE_INDICATOR_KEYS).is_none() {
            warnings.push(
                ValidationIssue::new(
                    IssueCode::MissingStateIndicator,
                    "state block has no recognizable state or mood indicator",
                )
                .in_block(STATE_BLOCK),
            );
        }
    }

    if document.has_block(MEM_BLOCK) && !document.memories().iter().any(|memory| memory.tagged) {
        warnings.push(
            ValidationIssue::new(
                IssueCode::UntaggedMemories,
                "memory block has no tagged entries",
            )
            .in_block(MEM_BLOCK),
        );
    }
}

fn check_size(
    size_bytes: usize,
    limits: &ValidationLimits,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    if size_bytes > limits.hard_limit_bytes {
        errors.push(ValidationIssue::new(
            IssueCode::SizeLimitExceeded,
            format!(
                "document is {size_bytes} bytes; hard limit is {} bytes",
                limits.hard_limit_bytes
            ),
        ));
    } else if size_bytes > limits.soft_limit_bytes {
        warnings.push(ValidationIssue::new(
            IssueCode::ApproachingSizeLimit,
            format!(
                "document is {size_bytes} bytes; approaching the {} byte limit",
                limits.hard_limit_bytes
            ),
        ));
    }
}

/// [`validate_with`], emitting `validation-failed` to `sink` when invalid.
pub fn validate_and_report(
    text: &str,
    limits: &ValidationLimits,
    sink: &dyn EventSink,
) -> ValidationResult {
    let result = validate_with(text, limits);
    if result.has_warning(IssueCode::ApproachingSizeLimit) {
        tracing::warn!(
            size_bytes = result.size_bytes,
            "seed document is approaching its size limit"
        );
    }
    if !result.valid {
        tracing::warn!(errors = result.errors.len(), "seed document failed validation");
        sink.emit(&KernelEvent::ValidationFailed {
            errors: result.errors.clone(),
        });
    }
    result
}
