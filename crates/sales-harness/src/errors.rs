use sales_types::domain::document::DocumentKind;
use sales_types::ports::api_transport::TransportError;
use thiserror::Error;

/// Every variant is terminal for the run.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("login failed with status {status}: {body}")]
    Auth { status: u16, body: String },

    #[error("no usable tenant: {0}")]
    NoTenant(String),

    #[error("no {fixture} found: {detail}")]
    NoFixture { fixture: &'static str, detail: String },

    #[error("{step} failed with status {status}: {body}")]
    Lookup {
        step: String,
        status: u16,
        body: String,
    },

    #[error("failed to create {kind} (status {status}): {body}")]
    Creation {
        kind: DocumentKind,
        status: u16,
        body: String,
    },

    #[error("failed to update {kind} (status {status}): {body}")]
    Update {
        kind: DocumentKind,
        status: u16,
        body: String,
    },

    #[error("failed to {transition} {kind} (status {status}): {body}")]
    Transition {
        kind: DocumentKind,
        transition: String,
        status: u16,
        body: String,
    },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("could not decode {step} response: {detail}")]
    Decode { step: String, detail: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HarnessError {
    pub fn decode(step: impl Into<String>, err: serde_json::Error) -> Self {
        HarnessError::Decode {
            step: step.into(),
            detail: err.to_string(),
        }
    }

    /// HTTP status of the offending response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            HarnessError::Auth { status, .. }
            | HarnessError::Lookup { status, .. }
            | HarnessError::Creation { status, .. }
            | HarnessError::Update { status, .. }
            | HarnessError::Transition { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Process exit code for this failure category.
    ///
    /// | Code | Category                                  |
    /// |------|-------------------------------------------|
    /// | 2    | configuration                             |
    /// | 3    | authentication                            |
    /// | 4    | missing tenant or fixture, failed lookup  |
    /// | 5    | create/update/transition rejected         |
    /// | 6    | invariant violated, undecodable response  |
    /// | 7    | transport                                 |
    pub fn exit_code(&self) -> u8 {
        match self {
            HarnessError::Config(_) => 2,
            HarnessError::Auth { .. } => 3,
            HarnessError::NoTenant(_)
            | HarnessError::NoFixture { .. }
            | HarnessError::Lookup { .. } => 4,
            HarnessError::Creation { .. }
            | HarnessError::Update { .. }
            | HarnessError::Transition { .. } => 5,
            HarnessError::Invariant(_) | HarnessError::Decode { .. } => 6,
            HarnessError::Transport(_) => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_status_and_verbatim_body() {
        let err = HarnessError::Transition {
            kind: DocumentKind::Invoice,
            transition: "approve step 0".into(),
            status: 400,
            body: r#"{"message":"Invalid status transition"}"#.into(),
        };
        assert_eq!(
            err.to_string(),
            r#"failed to approve step 0 Invoice (status 400): {"message":"Invalid status transition"}"#
        );
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn exit_codes_by_category() {
        assert_eq!(HarnessError::Config("x".into()).exit_code(), 2);
        assert_eq!(
            HarnessError::NoFixture {
                fixture: "customer",
                detail: "empty".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(HarnessError::Invariant("x".into()).exit_code(), 6);
        assert_eq!(
            HarnessError::from(TransportError::Request("refused".into())).exit_code(),
            7
        );
        assert_eq!(HarnessError::Invariant("x".into()).status(), None);
    }
}
