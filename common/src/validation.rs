//! Validation outcomes for headers, payloads and tree operations.
//!
//! Every failure carries a stable machine-readable code plus a stack of
//! context labels pushed while the error travels outward through nested
//! calls, e.g. `accept-block+contextually-check-block: ...`.

use std::fmt;
use thiserror::Error;

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The header or payload fails self-consistent checks.
    #[error("{message}")]
    StructuralInvalid { code: &'static str, message: String },

    /// The referenced parent is not in the tree.
    #[error("can not find previous block {parent}")]
    UnknownParent { parent: String },

    /// Ancestor-dependent checks failed (timestamp, difficulty, height).
    #[error("{message}")]
    ContextuallyInvalid { code: &'static str, message: String },

    /// The block connects to a block already marked invalid.
    #[error("one of previous blocks of {hash} is invalid")]
    BadChain { hash: String },

    /// Containing block is too far above the endorsed block.
    #[error(
        "endorsement expired: containing height {containing_height}, endorsed height {endorsed_height}, window {window}"
    )]
    EndorsementExpired {
        containing_height: u32,
        endorsed_height: u32,
        window: u32,
    },

    /// The same endorsement is already recorded within the window.
    #[error("duplicate endorsement {id} already contained in block {containing}")]
    EndorsementDuplicate { id: String, containing: String },

    /// No block exists at the endorsed height on the containing branch.
    #[error("no block found on endorsed height {height}")]
    EndorsedBlockNotFound { height: u32 },

    /// The block at the endorsed height is not the endorsed one.
    #[error("endorsed block {endorsed} is on a different chain, branch has {found}")]
    EndorsedBlockDiffers { endorsed: String, found: String },

    /// The block of proof is unknown to the protecting tree.
    #[error("can not find block of proof {hash}")]
    ProofBlockNotFound { hash: String },

    /// The block payloads should be attached to is unknown.
    #[error("can not find containing block {hash}")]
    ContainingBlockNotFound { hash: String },

    /// The referenced block is not in the tree.
    #[error("unknown block {hash}")]
    UnknownBlock { hash: String },

    /// The operation needs a block on the active chain.
    #[error("block {hash} is not on the active chain")]
    NotOnActiveChain { hash: String },

    /// Tree is already bootstrapped or the seed chain is unusable.
    #[error("{message}")]
    BootstrapStateError { code: &'static str, message: String },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::StructuralInvalid { code, .. } => code,
            ValidationError::UnknownParent { .. } => "bad-prev-block",
            ValidationError::ContextuallyInvalid { code, .. } => code,
            ValidationError::BadChain { .. } => "bad-chain",
            ValidationError::EndorsementExpired { .. } => "expired",
            ValidationError::EndorsementDuplicate { .. } => "duplicate",
            ValidationError::EndorsedBlockNotFound { .. } => "no-endorsed-block",
            ValidationError::EndorsedBlockDiffers { .. } => "block-differs",
            ValidationError::ProofBlockNotFound { .. } => "block-of-proof-not-found",
            ValidationError::ContainingBlockNotFound { .. } => "no-containing-block",
            ValidationError::UnknownBlock { .. } => "unknown-block",
            ValidationError::NotOnActiveChain { .. } => "not-on-active-chain",
            ValidationError::BootstrapStateError { code, .. } => code,
        }
    }
}

/// A [`ValidationError`] with the context it propagated through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationState {
    error: ValidationError,
    /// Innermost label first.
    stack: Vec<String>,
}

impl ValidationState {
    pub fn new(error: ValidationError) -> Self {
        Self {
            error,
            stack: Vec::new(),
        }
    }

    pub fn error(&self) -> &ValidationError {
        &self.error
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }

    /// Context labels, outermost first.
    pub fn stack(&self) -> Vec<&str> {
        self.stack.iter().rev().map(String::as_str).collect()
    }

    /// Push a label as the error leaves another layer.
    pub fn push(mut self, label: impl Into<String>) -> Self {
        self.stack.push(label.into());
        self
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = self.stack();
        path.push(self.code());
        write!(f, "{}: {}", path.join("+"), self.error)
    }
}

impl std::error::Error for ValidationState {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<ValidationError> for ValidationState {
    fn from(error: ValidationError) -> Self {
        ValidationState::new(error)
    }
}

pub type ValidationResult<T> = Result<T, ValidationState>;

/// Adds a context label to the error side of a result.
pub trait WithStack<T> {
    fn stack(self, label: &str) -> ValidationResult<T>;
}

impl<T, E: Into<ValidationState>> WithStack<T> for Result<T, E> {
    fn stack(self, label: &str) -> ValidationResult<T> {
        self.map_err(|e| e.into().push(label))
    }
}
