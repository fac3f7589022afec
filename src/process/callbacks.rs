//! Per-runnable success, error and timeout handlers.

use crate::error::{ErrorKind, RemoteError};
use serde_json::Value;

type SuccessCallback = Box<dyn FnMut(&Value) + Send>;
type ErrorCallback = Box<dyn FnMut(&RemoteError) + Send>;
type TimeoutCallback = Box<dyn FnMut() + Send>;

/// Ordered handler lists for one runnable.
#[derive(Default)]
pub struct ProcessCallbacks {
    success: Vec<SuccessCallback>,
    /// Each handler with the kind it accepts (None = any kind).
    error: Vec<(Option<ErrorKind>, ErrorCallback)>,
    timeout: Vec<TimeoutCallback>,
}

impl ProcessCallbacks {
    pub fn on_success(&mut self, callback: impl FnMut(&Value) + Send + 'static) {
        self.success.push(Box::new(callback));
    }

    pub fn on_error(
        &mut self,
        kind: Option<ErrorKind>,
        callback: impl FnMut(&RemoteError) + Send + 'static,
    ) {
        self.error.push((kind, Box::new(callback)));
    }

    pub fn on_timeout(&mut self, callback: impl FnMut() + Send + 'static) {
        self.timeout.push(Box::new(callback));
    }

    /// Invoke every success handler in registration order.
    pub fn fire_success(&mut self, output: &Value) {
        for callback in &mut self.success {
            callback(output);
        }
    }

    /// Invoke the first error handler whose declared kind accepts `err`.
    ///
    /// Hands the error back when no handler is registered at all. Returns
    /// `Ok(false)` when handlers exist but none accepts this kind.
    pub fn fire_error(&mut self, err: RemoteError) -> Result<bool, RemoteError> {
        if self.error.is_empty() {
            return Err(err);
        }
        let handler = self
            .error
            .iter_mut()
            .find(|(kind, _)| kind.as_ref().is_none_or(|k| k.accepts(&err.kind)));
        match handler {
            Some((_, callback)) => {
                callback(&err);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Invoke every timeout handler.
    pub fn fire_timeout(&mut self) {
        for callback in &mut self.timeout {
            callback();
        }
    }
}

impl std::fmt::Debug for ProcessCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCallbacks")
            .field("success", &self.success.len())
            .field("error", &self.error.len())
            .field("timeout", &self.timeout.len())
            .finish()
    }
}
