//! The Interaction Command Router (§4.6): resolves an inbound interaction
//! to a registered handler, builds its middleware chain, and dispatches
//! it on an isolated task so a handler panic can never take the router
//! down with it.

pub mod deferred;
pub mod error;
pub mod middleware;
pub mod node;

use crate::interaction::{
    CommandOption, Interaction, InteractionKind, InteractionResponse, OPTION_KIND_SUBCOMMAND,
    OPTION_KIND_SUBCOMMAND_GROUP,
};
use error::DuplicateNameError;
use middleware::{build_chain, Middleware};
use node::{CommandContext, CommandHandler, CommandNode, ComponentContext, ComponentHandler};
use std::{collections::HashMap, sync::Arc};

/// Builds a [`Router`] by registering commands, subgroups, and component
/// handlers. Every registration is synchronous and fails with
/// [`DuplicateNameError`] rather than overwriting an existing entry — per
/// §7 this is a programmer error, not a runtime condition to recover from.
pub struct RouterBuilder {
    commands: HashMap<String, CommandNode>,
    components: HashMap<String, ComponentHandler>,
    root_middlewares: Vec<Middleware>,
    on_error: Arc<dyn Fn(String) + Send + Sync>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            components: HashMap::new(),
            root_middlewares: Vec::new(),
            on_error: Arc::new(|message| tracing::error!(%message, "interaction handler failed")),
        }
    }

    /// Replace the reporter invoked when a handler task panics or is
    /// cancelled, or a deferred follow-up fails to post.
    #[must_use]
    pub fn on_error(mut self, reporter: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(reporter);
        self
    }

    /// Add a middleware that runs before any command's own middlewares,
    /// for every command dispatched through this router.
    #[must_use]
    pub fn root_middleware(mut self, middleware: Middleware) -> Self {
        self.root_middlewares.push(middleware);
        self
    }

    /// Register a leaf command at `path` (root name, or
    /// `[group, subcommand]` / `[group, subgroup, subcommand]` for nested
    /// ones), with its own middleware chain and an optional autocomplete
    /// handler for its focused option.
    pub fn command(
        mut self,
        path: &[&str],
        handler: CommandHandler,
        autocomplete: Option<CommandHandler>,
        middlewares: Vec<Middleware>,
    ) -> Result<Self, DuplicateNameError> {
        insert_leaf(&mut self.commands, path, handler, autocomplete, middlewares)?;
        Ok(self)
    }

    /// Attach a middleware to the subgroup at `path`, creating the
    /// subgroup (and any missing ancestors) if it doesn't exist yet.
    /// Errors if `path` collides with an already-registered leaf command.
    pub fn subgroup_middleware(mut self, path: &[&str], middleware: Middleware) -> Result<Self, DuplicateNameError> {
        ensure_subgroup(&mut self.commands, path)?.push(middleware);
        Ok(self)
    }

    /// Register a component handler under `custom_id`. Components live in
    /// a flat namespace separate from commands: a component interaction is
    /// looked up directly by `customID`, with no tree walk (§4.6).
    pub fn component(mut self, custom_id: impl Into<String>, handler: ComponentHandler) -> Result<Self, DuplicateNameError> {
        let custom_id = custom_id.into();
        if self.components.contains_key(&custom_id) {
            return Err(DuplicateNameError::new(custom_id));
        }
        self.components.insert(custom_id, handler);
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> Router {
        Router {
            commands: self.commands,
            components: self.components,
            root_middlewares: self.root_middlewares,
            on_error: self.on_error,
        }
    }
}

fn insert_leaf(
    commands: &mut HashMap<String, CommandNode>,
    path: &[&str],
    handler: CommandHandler,
    autocomplete: Option<CommandHandler>,
    middlewares: Vec<Middleware>,
) -> Result<(), DuplicateNameError> {
    match path {
        [] => panic!("command path must not be empty"),
        [name] => {
            if commands.contains_key(*name) {
                return Err(DuplicateNameError::new(*name));
            }
            commands.insert(
                (*name).to_owned(),
                CommandNode::Leaf {
                    handler,
                    autocomplete,
                    middlewares,
                },
            );
            Ok(())
        }
        [name, rest @ ..] => {
            let entry = commands.entry((*name).to_owned()).or_insert_with(|| CommandNode::Subgroup {
                children: HashMap::new(),
                middlewares: Vec::new(),
            });
            match entry {
                CommandNode::Subgroup { children, .. } => insert_leaf(children, rest, handler, autocomplete, middlewares),
                CommandNode::Leaf { .. } => Err(DuplicateNameError::new(*name)),
            }
        }
    }
}

fn ensure_subgroup<'a>(
    commands: &'a mut HashMap<String, CommandNode>,
    path: &[&str],
) -> Result<&'a mut Vec<Middleware>, DuplicateNameError> {
    match path {
        [] => panic!("subgroup path must not be empty"),
        [name] => {
            let entry = commands.entry((*name).to_owned()).or_insert_with(|| CommandNode::Subgroup {
                children: HashMap::new(),
                middlewares: Vec::new(),
            });
            match entry {
                CommandNode::Subgroup { middlewares, .. } => Ok(middlewares),
                CommandNode::Leaf { .. } => Err(DuplicateNameError::new(*name)),
            }
        }
        [name, rest @ ..] => {
            let entry = commands.entry((*name).to_owned()).or_insert_with(|| CommandNode::Subgroup {
                children: HashMap::new(),
                middlewares: Vec::new(),
            });
            match entry {
                CommandNode::Subgroup { children, .. } => ensure_subgroup(children, rest),
                CommandNode::Leaf { .. } => Err(DuplicateNameError::new(*name)),
            }
        }
    }
}

/// A built, dispatch-ready router. Cheaply cloneable; share one instance
/// across the tasks that receive interactions.
pub struct Router {
    commands: HashMap<String, CommandNode>,
    components: HashMap<String, ComponentHandler>,
    root_middlewares: Vec<Middleware>,
    on_error: Arc<dyn Fn(String) + Send + Sync>,
}

impl Router {
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Resolve and dispatch `interaction`, returning the response to send
    /// (if any). Never panics: a handler panic is caught at the task
    /// boundary and reported through the configured error reporter.
    pub async fn dispatch(&self, interaction: Interaction) -> Option<InteractionResponse> {
        match interaction.kind() {
            InteractionKind::ApplicationCommand => self.dispatch_command(interaction, false).await,
            InteractionKind::ApplicationCommandAutocomplete => self.dispatch_command(interaction, true).await,
            InteractionKind::MessageComponent => self.dispatch_component(interaction).await,
            InteractionKind::Unknown => None,
        }
    }

    async fn dispatch_command(&self, interaction: Interaction, autocomplete: bool) -> Option<InteractionResponse> {
        let data = interaction.command_data()?;
        let resolved = resolve(&self.commands, &data.name, &data.options)?;

        let handler = if autocomplete {
            resolved.autocomplete?
        } else {
            resolved.handler
        };

        let mut middlewares = self.root_middlewares.clone();
        middlewares.extend(resolved.middlewares);

        let ctx = CommandContext {
            interaction: Arc::new(interaction),
            data: Arc::new(data),
            deferred: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };

        let chain = build_chain(&middlewares, move |ctx| handler(ctx));
        self.run(chain(ctx)).await
    }

    async fn dispatch_component(&self, interaction: Interaction) -> Option<InteractionResponse> {
        let data = interaction.component_data()?;
        let handler = self.components.get(&data.custom_id)?.clone();

        let ctx = ComponentContext {
            interaction: Arc::new(interaction),
            data: Arc::new(data),
        };

        self.run(handler(ctx)).await
    }

    async fn run(&self, future: node::HandlerFuture) -> Option<InteractionResponse> {
        match tokio::spawn(future).await {
            Ok(response) => response,
            Err(join_err) => {
                if join_err.is_panic() {
                    (self.on_error)(format!("interaction handler panicked: {join_err}"));
                } else {
                    (self.on_error)(format!("interaction handler task was cancelled: {join_err}"));
                }
                None
            }
        }
    }
}

struct Resolved {
    handler: CommandHandler,
    autocomplete: Option<CommandHandler>,
    middlewares: Vec<Middleware>,
}

fn resolve(root: &HashMap<String, CommandNode>, top_name: &str, top_options: &[CommandOption]) -> Option<Resolved> {
    let mut node = root.get(top_name)?;
    let mut options = top_options;
    let mut middlewares = Vec::new();

    loop {
        middlewares.extend(node.middlewares().iter().cloned());
        match node {
            CommandNode::Leaf { handler, autocomplete, .. } => {
                return Some(Resolved {
                    handler: Arc::clone(handler),
                    autocomplete: autocomplete.clone(),
                    middlewares,
                });
            }
            CommandNode::Subgroup { children, .. } => {
                let next = options
                    .iter()
                    .find(|option| matches!(option.kind, OPTION_KIND_SUBCOMMAND | OPTION_KIND_SUBCOMMAND_GROUP))?;
                node = children.get(&next.name)?;
                options = &next.options;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::InteractionResponseFlags;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn interaction_with_data(kind_raw: u8, data: serde_json::Value) -> Interaction {
        Interaction {
            id: "1".into(),
            application_id: "app".into(),
            token: "tok".into(),
            kind_raw,
            data: Some(data),
        }
    }

    fn leaf(counter: Arc<AtomicU32>) -> CommandHandler {
        Arc::new(move |_ctx| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(InteractionResponse::message("pong", InteractionResponseFlags::default()))
            })
        })
    }

    #[tokio::test]
    async fn routes_top_level_command() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = Router::builder()
            .command(&["ping"], leaf(Arc::clone(&calls)), None, vec![])
            .unwrap()
            .build();

        let interaction = interaction_with_data(
            2,
            serde_json::json!({ "id": "9", "name": "ping", "options": [] }),
        );

        let response = router.dispatch(interaction).await;
        assert!(response.is_some());
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn routes_nested_subcommand() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = Router::builder()
            .command(&["config", "set"], leaf(Arc::clone(&calls)), None, vec![])
            .unwrap()
            .build();

        let interaction = interaction_with_data(
            2,
            serde_json::json!({
                "id": "9",
                "name": "config",
                "options": [
                    { "name": "set", "type": 1, "options": [] }
                ]
            }),
        );

        let response = router.dispatch(interaction).await;
        assert!(response.is_some());
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn duplicate_command_name_is_rejected() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = Router::builder()
            .command(&["ping"], leaf(Arc::clone(&calls)), None, vec![])
            .unwrap()
            .command(&["ping"], leaf(calls), None, vec![])
            .unwrap_err();

        assert_eq!("ping", err.name());
    }

    #[tokio::test]
    async fn unregistered_autocomplete_is_dropped() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = Router::builder()
            .command(&["ping"], leaf(calls), None, vec![])
            .unwrap()
            .build();

        let interaction = interaction_with_data(
            4,
            serde_json::json!({ "id": "9", "name": "ping", "options": [] }),
        );

        assert!(router.dispatch(interaction).await.is_none());
    }

    #[tokio::test]
    async fn component_is_looked_up_by_custom_id_without_a_tree_walk() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler_calls = Arc::clone(&calls);
        let handler: ComponentHandler = Arc::new(move |_ctx: ComponentContext| {
            let calls = Arc::clone(&handler_calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                None
            })
        });

        let router = Router::builder().component("accept-button", handler).unwrap().build();

        let interaction = interaction_with_data(3, serde_json::json!({ "custom_id": "accept-button", "values": [] }));
        router.dispatch(interaction).await;
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_instead_of_crashing() {
        let reported = Arc::new(std::sync::Mutex::new(Vec::new()));
        let reported_clone = Arc::clone(&reported);

        let handler: CommandHandler = Arc::new(|_ctx| Box::pin(async { panic!("boom") }));

        let router = Router::builder()
            .on_error(move |message| reported_clone.lock().unwrap().push(message))
            .command(&["ping"], handler, None, vec![])
            .unwrap()
            .build();

        let interaction = interaction_with_data(2, serde_json::json!({ "id": "9", "name": "ping", "options": [] }));
        let response = router.dispatch(interaction).await;

        assert!(response.is_none());
        assert_eq!(1, reported.lock().unwrap().len());
    }
}
