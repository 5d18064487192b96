//! Name-to-handler dispatch table with typed parameter decoding.
//!
//! Each handler declares the record its parameters decode into. The
//! registry performs the decode explicitly and reports a readable error
//! when it fails, so handlers only ever see well-formed input.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{CommandExecutor, ExecutorError};

type Handler = Box<dyn Fn(Map<String, Value>) -> Result<Value, ExecutorError> + Send + Sync>;

struct Entry {
    handler: Handler,
    privileged: bool,
}

/// Dispatch table implementing [`CommandExecutor`].
///
/// ```
/// use command_bridge::executor::{CommandExecutor, CommandRegistry};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Echo {
///     text: String,
/// }
///
/// let mut registry = CommandRegistry::new();
/// registry.register("echo", |params: Echo| Ok(serde_json::json!({ "text": params.text })));
///
/// let params = serde_json::json!({ "text": "hi" });
/// let out = registry
///     .execute("echo", params.as_object().cloned().unwrap_or_default())
///     .unwrap();
/// assert_eq!(out["text"], "hi");
/// ```
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Entry>,
    allow_privileged: bool,
}

impl CommandRegistry {
    /// Empty registry refusing privileged commands.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit or refuse commands registered with
    /// [`register_privileged`](Self::register_privileged).
    #[must_use]
    pub fn allow_privileged(mut self, allow: bool) -> Self {
        self.allow_privileged = allow;
        self
    }

    /// Register `handler` for `name`, replacing any earlier handler.
    pub fn register<P, F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        P: DeserializeOwned,
        F: Fn(P) -> Result<Value, ExecutorError> + Send + Sync + 'static,
    {
        self.insert(name, handler, false)
    }

    /// Register a handler that only runs when privileged commands are
    /// allowed, e.g. one evaluating caller-supplied code.
    pub fn register_privileged<P, F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        P: DeserializeOwned,
        F: Fn(P) -> Result<Value, ExecutorError> + Send + Sync + 'static,
    {
        self.insert(name, handler, true)
    }

    /// Whether `name` has a handler.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered command names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn insert<P, F>(&mut self, name: &str, handler: F, privileged: bool) -> &mut Self
    where
        P: DeserializeOwned,
        F: Fn(P) -> Result<Value, ExecutorError> + Send + Sync + 'static,
    {
        let command = name.to_owned();
        let wrapped: Handler = Box::new(move |params| {
            let typed: P = serde_json::from_value(Value::Object(params)).map_err(|err| {
                ExecutorError::new(format!("Invalid parameters for {command}: {err}"))
            })?;
            handler(typed)
        });

        self.handlers.insert(
            name.to_owned(),
            Entry {
                handler: wrapped,
                privileged,
            },
        );
        self
    }
}

impl CommandExecutor for CommandRegistry {
    fn execute(&self, name: &str, params: Map<String, Value>) -> Result<Value, ExecutorError> {
        let Some(entry) = self.handlers.get(name) else {
            debug!(command = name, "no handler registered");
            return Err(ExecutorError::unknown_command(name));
        };

        if entry.privileged && !self.allow_privileged {
            warn!(command = name, "privileged command refused");
            return Err(ExecutorError::new(format!("Command not permitted: {name}")));
        }

        (entry.handler)(params)
    }
}
