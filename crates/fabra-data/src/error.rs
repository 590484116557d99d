//! Customer-visible error classification.
//!
//! Errors in this repo fall into three kinds: customer-visible (bad
//! configuration, auth failures against the customer's backend, SQL syntax
//! errors), transient (retried by the workflow), and programmer errors
//! (panics caught by the pipeline supervisor). Only the first kind carries a
//! message that may be persisted into a sync run and shown to the customer.
//!
//! Wrap at the lowest level, where the message is still short and free of
//! internal context.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CustomerVisibleError {
    message: String,
}

impl CustomerVisibleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Build an `anyhow::Error` whose message is safe to surface to the
/// customer.
pub fn customer_visible(message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(CustomerVisibleError::new(message))
}

/// Extract the customer-visible message from an error chain, if any link is
/// a [`CustomerVisibleError`]. Wrapping context added above the original
/// error does not leak: only the visible link's own message is returned.
pub fn customer_visible_message(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CustomerVisibleError>())
        .map(|visible| visible.message().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn visible_message_survives_wrapping() {
        let err = customer_visible("BigQuery connection must have location defined")
            .context("building warehouse client")
            .context("replicate");

        assert_eq!(
            customer_visible_message(&err).as_deref(),
            Some("BigQuery connection must have location defined")
        );
    }

    #[test]
    fn wrapping_context_does_not_leak_into_message() {
        let err = customer_visible("invalid credentials").context("internal detail");
        assert_eq!(
            customer_visible_message(&err).as_deref(),
            Some("invalid credentials")
        );
    }

    #[test]
    fn plain_errors_are_not_visible() {
        let err = anyhow::anyhow!("io timeout").context("scanning rows");
        assert_eq!(customer_visible_message(&err), None);
    }
}
