//! The command tree itself: subgroup/leaf nodes, the handler function
//! shapes they hold, and the per-invocation context handed to them.

use crate::{
    interaction::{ApplicationCommandData, Interaction, InteractionResponse, MessageComponentData},
    router::middleware::Middleware,
};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

/// A handler's returned future: `None` means "send no response" (§4.6).
pub type HandlerFuture = Pin<Box<dyn Future<Output = Option<InteractionResponse>> + Send>>;

/// Context handed to a command or autocomplete handler: the raw
/// interaction plus the resolved command data (so a handler doesn't have
/// to re-parse `data` itself).
#[derive(Clone)]
pub struct CommandContext {
    pub interaction: Arc<Interaction>,
    pub data: Arc<ApplicationCommandData>,
    /// Set once the deferrable middleware has sent the placeholder ack;
    /// a handler can check this to decide whether it's still racing the
    /// initial-response window.
    pub deferred: Arc<std::sync::atomic::AtomicBool>,
}

impl CommandContext {
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.deferred.load(std::sync::atomic::Ordering::Acquire)
    }
}

/// Context handed to a component handler.
#[derive(Clone)]
pub struct ComponentContext {
    pub interaction: Arc<Interaction>,
    pub data: Arc<MessageComponentData>,
}

pub type CommandHandler = Arc<dyn Fn(CommandContext) -> HandlerFuture + Send + Sync>;
pub type ComponentHandler = Arc<dyn Fn(ComponentContext) -> HandlerFuture + Send + Sync>;

/// One element of the command tree (§3, "Command node"): a name maps to
/// exactly one of these kinds, never more than one.
pub(crate) enum CommandNode {
    Subgroup {
        children: HashMap<String, CommandNode>,
        middlewares: Vec<Middleware>,
    },
    Leaf {
        handler: CommandHandler,
        autocomplete: Option<CommandHandler>,
        middlewares: Vec<Middleware>,
    },
}

impl CommandNode {
    pub(crate) fn middlewares(&self) -> &[Middleware] {
        match self {
            Self::Subgroup { middlewares, .. } => middlewares,
            Self::Leaf { middlewares, .. } => middlewares,
        }
    }
}
