//! The deferrable middleware (§4.6): races a handler against a bounded
//! window, sending a placeholder ack if the handler hasn't finished in
//! time and posting its eventual result as a REST follow-up.

use crate::{
    interaction::{InteractionResponse, InteractionResponseFlags},
    rest::RestClient,
    router::{
        middleware::{Middleware, Next},
        node::CommandContext,
    },
};
use std::{sync::atomic::Ordering, sync::Arc, time::Duration};

/// Default window a handler gets before the middleware defers on its
/// behalf, per §4.6.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1_500);

/// Configuration for [`deferrable`].
#[derive(Clone)]
pub struct DeferrableConfig {
    pub window: Duration,
    pub flags: InteractionResponseFlags,
}

impl Default for DeferrableConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            flags: InteractionResponseFlags::default(),
        }
    }
}

/// Build the deferrable middleware. `rest` is used only if the window
/// elapses before the handler does, to post the eventual result as a
/// follow-up; `on_error` receives a description of any panic the handler
/// task takes, either in the raced task or the background continuation.
pub fn deferrable(
    rest: Arc<dyn RestClient>,
    config: DeferrableConfig,
    on_error: Arc<dyn Fn(String) + Send + Sync>,
) -> Middleware {
    Arc::new(move |ctx: CommandContext, next: Next| {
        let rest = Arc::clone(&rest);
        let on_error = Arc::clone(&on_error);
        let window = config.window;
        let flags = config.flags;

        Box::pin(async move {
            let deferred_flag = Arc::clone(&ctx.deferred);
            let application_id = ctx.interaction.application_id.clone();
            let token = ctx.interaction.token.clone();

            let mut handler_task = tokio::spawn({
                let ctx = ctx.clone();
                async move { next(ctx).await }
            });

            tokio::select! {
                biased;

                result = &mut handler_task => {
                    return match result {
                        Ok(response) => response,
                        Err(join_err) => {
                            report_join_error(&on_error, &join_err);
                            None
                        }
                    };
                }

                () = tokio::time::sleep(window) => {}
            }

            deferred_flag.store(true, Ordering::Release);

            tokio::spawn(async move {
                let result = handler_task.await;
                let response = match result {
                    Ok(Some(response)) => response,
                    Ok(None) => return,
                    Err(join_err) => {
                        report_join_error(&on_error, &join_err);
                        return;
                    }
                };

                if let Err(source) = rest.post_followup(&application_id, &token, &response).await {
                    on_error(format!("posting deferred follow-up failed: {source}"));
                }
            });

            Some(InteractionResponse::deferred(flags))
        })
    })
}

fn report_join_error(on_error: &Arc<dyn Fn(String) + Send + Sync>, join_err: &tokio::task::JoinError) {
    if join_err.is_panic() {
        on_error(format!("command handler panicked: {join_err}"));
    } else {
        on_error(format!("command handler task was cancelled: {join_err}"));
    }
}
