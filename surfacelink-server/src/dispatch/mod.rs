//! Command dispatch
//!
//! Maps a request's command type to a registered handler, validates the
//! parameters against the handler's schema and produces a job for the
//! execution queue. The table is built at startup and read-only afterwards.

mod schema;

pub use schema::{FieldSpec, ParamKind, ParamSchema};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use surfacelink_protocol::Params;
use surfacelink_utils::{BridgeError, Result};
use tracing::{debug, warn};

use crate::host::HostContext;

/// Handler body; runs on the privileged thread
pub type HandlerFn = Arc<dyn Fn(&mut HostContext, &Params) -> Result<Value> + Send + Sync>;

/// A registered command
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub schema: ParamSchema,
    pub handler: HandlerFn,
    /// Overrides the connection's command timeout
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<F>(name: impl Into<String>, schema: ParamSchema, handler: F) -> Self
    where
        F: Fn(&mut HostContext, &Params) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            schema,
            handler: Arc::new(handler),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A validated request, ready to queue
pub struct ResolvedCommand {
    pub name: String,
    pub params: Params,
    pub timeout: Option<Duration>,
    handler: HandlerFn,
}

impl ResolvedCommand {
    /// Run the handler; call only on the privileged thread
    pub fn execute(&self, ctx: &mut HostContext) -> Result<Value> {
        (self.handler)(ctx, &self.params)
    }

    /// Package the command as an execution queue job
    pub fn into_job(self) -> impl FnOnce(&mut HostContext) -> Result<Value> + Send + 'static {
        move |ctx: &mut HostContext| self.execute(ctx)
    }
}

impl std::fmt::Debug for ResolvedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCommand")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Command table
#[derive(Default)]
pub struct Dispatcher {
    commands: HashMap<String, CommandSpec>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command, replacing any earlier one with the same name
    pub fn register(&mut self, spec: CommandSpec) -> Option<CommandSpec> {
        debug!(command = %spec.name, "Registered command");
        let previous = self.commands.insert(spec.name.clone(), spec);
        if let Some(previous) = &previous {
            warn!(command = %previous.name, "Replaced existing command handler");
        }
        previous
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Registered command names, sorted
    pub fn command_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a command type and its parameters
    pub fn dispatch(&self, command_type: &str, params: &Params) -> Result<ResolvedCommand> {
        let spec = self
            .commands
            .get(command_type)
            .ok_or_else(|| BridgeError::UnknownCommand(command_type.to_string()))?;
        let params = spec.schema.validate(params)?;

        Ok(ResolvedCommand {
            name: spec.name.clone(),
            params,
            timeout: spec.timeout,
            handler: Arc::clone(&spec.handler),
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.command_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogCache;
    use crate::executor::{ExecutionQueue, QueueOptions};
    use crate::host::StaticCatalogHost;
    use serde_json::json;

    fn echo() -> CommandSpec {
        CommandSpec::new(
            "echo",
            ParamSchema::new().required("text", ParamKind::String),
            |_, params| Ok(json!({ "text": params["text"] })),
        )
    }

    fn context() -> HostContext {
        let (queue, _executor) = ExecutionQueue::new(QueueOptions::default());
        HostContext::new(
            Box::new(StaticCatalogHost::builtin()),
            Arc::new(CatalogCache::new(queue)),
        )
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_unknown_command() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher.dispatch("set_tempo", &Params::new()).unwrap_err();
        assert_eq!(err.to_string(), "UnknownCommand: set_tempo");
    }

    #[test]
    fn test_invalid_params_rejected_before_execution() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(echo());

        let err = dispatcher.dispatch("echo", &Params::new()).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidParameters { ref field, .. } if field == "text"));
    }

    #[test]
    fn test_dispatch_and_execute() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(echo());

        let resolved = dispatcher
            .dispatch("echo", &params(json!({"text": "hi"})))
            .unwrap();
        let mut ctx = context();
        assert_eq!(resolved.execute(&mut ctx).unwrap(), json!({"text": "hi"}));

        let job = resolved.into_job();
        assert_eq!(job(&mut ctx).unwrap(), json!({"text": "hi"}));
    }

    #[test]
    fn test_register_replaces() {
        let mut dispatcher = Dispatcher::new();
        assert!(dispatcher.register(echo()).is_none());
        assert!(dispatcher.register(echo()).is_some());
        assert_eq!(dispatcher.command_names(), vec!["echo"]);
    }

    #[test]
    fn test_timeout_override_carried() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(echo().with_timeout(Duration::from_secs(30)));
        let resolved = dispatcher
            .dispatch("echo", &params(json!({"text": "x"})))
            .unwrap();
        assert_eq!(resolved.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_command_names_sorted() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(CommandSpec::new("b", ParamSchema::new(), |_, _| Ok(Value::Null)));
        dispatcher.register(CommandSpec::new("a", ParamSchema::new(), |_, _| Ok(Value::Null)));
        assert!(dispatcher.contains("a"));
        assert_eq!(dispatcher.command_names(), vec!["a", "b"]);
    }
}
