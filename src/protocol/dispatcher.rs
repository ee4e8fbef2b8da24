//! Method table that maps incoming commands to handler closures.
//!
//! Unregistered methods answer with the `unknown_method` sentinel.

use crate::error::{MiioError, Result};
use crate::protocol::message::{Command, Response, ResponseResult};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&Command) -> Option<Value> + Send + Sync + 'static;

/// Method dispatcher for the reference peer.
///
/// Handlers are keyed by method name. A missing handler, or a handler that
/// returns `None`, produces the `"unknown_method"` result.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(&Command) -> Option<Value> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().map_err(|_| {
            MiioError::InvalidParameters("Failed to acquire write lock on dispatcher".to_string())
        })?;

        handlers.insert(Cow::Owned(method.to_string()), Box::new(handler));
        Ok(())
    }

    pub fn is_registered(&self, method: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(method))
            .unwrap_or(false)
    }

    /// Run the handler for `cmd` and wrap its value in a response with the same id.
    ///
    /// Scalar results (numbers, booleans) are wrapped in a one-element list.
    pub fn dispatch(&self, cmd: &Command) -> Result<Response> {
        let handlers = self.handlers.read().map_err(|_| {
            MiioError::InvalidParameters("Failed to acquire read lock on dispatcher".to_string())
        })?;

        let value = handlers
            .get(cmd.method.as_str())
            .and_then(|handler| handler(cmd));

        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Response::unknown_method(cmd.id));
        };

        let value = match value {
            scalar @ (Value::Bool(_) | Value::Number(_)) => Value::Array(vec![scalar]),
            other => other,
        };
        Ok(Response::new(cmd.id, ResponseResult::from_value(Some(value))?))
    }
}
