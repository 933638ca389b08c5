//! The narrow REST surface the router needs (§6.1): posting a deferred
//! follow-up once a deferred handler finishes. Everything else about the
//! REST client — auth, the rest of the endpoint surface, ratelimiting — is
//! out of scope; this is the collaborator interface production callers
//! plug their own client into, and tests plug a recording mock into.

use std::{future::Future, pin::Pin};

use crate::interaction::InteractionResponse;

/// A boxed, thread-safe error, matching the teacher's convention for
/// surfaces that can't name a concrete error type without depending on one.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Collaborator capability the deferrable middleware needs: post a
/// follow-up message for an interaction that already received its initial
/// (deferred) response.
pub trait RestClient: Send + Sync {
    /// Post `response` as a follow-up to `application_id`'s
    /// `interaction_token`.
    fn post_followup<'a>(
        &'a self,
        application_id: &'a str,
        interaction_token: &'a str,
        response: &'a InteractionResponse,
    ) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>>;
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::{BoxError, RestClient};
    use crate::interaction::InteractionResponse;
    use std::{future::Future, pin::Pin, sync::Mutex};

    /// A recording mock used by router tests to assert a follow-up was
    /// posted, without depending on a real HTTP client.
    #[derive(Default)]
    pub struct RecordingRest {
        pub posted: Mutex<Vec<(String, String)>>,
    }

    impl RestClient for RecordingRest {
        fn post_followup<'a>(
            &'a self,
            application_id: &'a str,
            interaction_token: &'a str,
            _response: &'a InteractionResponse,
        ) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>> {
            self.posted
                .lock()
                .unwrap()
                .push((application_id.to_owned(), interaction_token.to_owned()));
            Box::pin(async { Ok(()) })
        }
    }
}
