//! Middleware chaining (§4.6, §5): root-first execution, built by folding
//! the resolved node's middleware list around the terminal handler.

use crate::router::node::{CommandContext, HandlerFuture};
use std::sync::Arc;

/// The rest of the chain a middleware may call to continue dispatch.
pub type Next = Arc<dyn Fn(CommandContext) -> HandlerFuture + Send + Sync>;

/// One link in a command's middleware chain.
pub type Middleware = Arc<dyn Fn(CommandContext, Next) -> HandlerFuture + Send + Sync>;

/// Fold `middlewares` (root-to-leaf order) around `terminal`, producing a
/// single callable that, when invoked, runs the root middleware first,
/// then each subsequent one, then the handler itself.
pub(crate) fn build_chain(
    middlewares: &[Middleware],
    terminal: impl Fn(CommandContext) -> HandlerFuture + Send + Sync + 'static,
) -> Next {
    let mut next: Next = Arc::new(terminal);

    for middleware in middlewares.iter().rev() {
        let middleware = Arc::clone(middleware);
        let inner = Arc::clone(&next);
        next = Arc::new(move |ctx| middleware(ctx, Arc::clone(&inner)));
    }

    next
}

#[cfg(test)]
mod tests {
    use super::build_chain;
    use crate::{
        interaction::{ApplicationCommandData, Interaction},
        router::node::CommandContext,
    };
    use std::sync::{atomic::{AtomicU32, Ordering}, Arc, Mutex};

    fn context() -> CommandContext {
        CommandContext {
            interaction: Arc::new(Interaction {
                id: "1".into(),
                application_id: "2".into(),
                token: "tok".into(),
                kind_raw: 2,
                data: None,
            }),
            data: Arc::new(ApplicationCommandData {
                id: "3".into(),
                name: "ping".into(),
                options: vec![],
            }),
            deferred: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn middlewares_run_root_first() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let root_order = Arc::clone(&order);
        let root: super::Middleware = Arc::new(move |ctx, next| {
            let order = Arc::clone(&root_order);
            Box::pin(async move {
                order.lock().unwrap().push("root");
                next(ctx).await
            })
        });

        let leaf_order = Arc::clone(&order);
        let leaf_mw: super::Middleware = Arc::new(move |ctx, next| {
            let order = Arc::clone(&leaf_order);
            Box::pin(async move {
                order.lock().unwrap().push("leaf");
                next(ctx).await
            })
        });

        let calls = Arc::new(AtomicU32::new(0));
        let handler_calls = Arc::clone(&calls);
        let chain = build_chain(&[root, leaf_mw], move |_ctx| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { None })
        });

        chain(context()).await;

        assert_eq!(vec!["root", "leaf"], *order.lock().unwrap());
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }
}
