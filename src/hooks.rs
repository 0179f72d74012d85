//! Lifecycle hooks around translation resolution.
//!
//! Hook kinds are a closed enum and handlers are held in ordered lists per
//! kind; dispatch iterates the matching list. A failing handler is logged and
//! skipped so hooks can never abort a resolution.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeTranslate,
    AfterTranslate,
    CacheHit,
    CacheMiss,
    LocaleChange,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub text: &'a str,
    pub source: &'a str,
    pub target: &'a str,
    pub detail: Option<&'a str>,
}

/// Handlers may replace the text in flight (`Ok(Some(...))`), observe without
/// touching it (`Ok(None)`), or fail (`Err`), which is logged and ignored.
pub type HookHandler = Box<dyn Fn(&HookContext<'_>) -> Result<Option<String>, String> + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    handlers: Mutex<HashMap<HookKind, Vec<HookHandler>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: HookKind, handler: HookHandler) {
        self.handlers
            .lock()
            .expect("hook registry lock")
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Runs every handler registered for `kind` in registration order and
    /// returns the last replacement text any of them produced.
    pub fn dispatch(&self, kind: HookKind, context: &HookContext<'_>) -> Option<String> {
        let handlers = self.handlers.lock().expect("hook registry lock");
        let Some(list) = handlers.get(&kind) else {
            return None;
        };
        let mut replacement = None;
        for handler in list {
            match handler(context) {
                Ok(Some(text)) => replacement = Some(text),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!("{:?} hook failed: {}", kind, err);
                }
            }
        }
        replacement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context<'a>() -> HookContext<'a> {
        HookContext {
            text: "Hello",
            source: "en",
            target: "es",
            detail: None,
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = HookRegistry::new();
        registry.register(
            HookKind::BeforeTranslate,
            Box::new(|ctx| Ok(Some(format!("{}!", ctx.text)))),
        );
        registry.register(
            HookKind::BeforeTranslate,
            Box::new(|ctx| Ok(Some(format!("{}?", ctx.text)))),
        );
        // Last replacement wins; both saw the original context.
        assert_eq!(
            registry.dispatch(HookKind::BeforeTranslate, &context()),
            Some("Hello?".to_string())
        );
    }

    #[test]
    fn failing_handlers_never_abort_dispatch() {
        let registry = HookRegistry::new();
        let observed = Arc::new(AtomicUsize::new(0));
        registry.register(
            HookKind::Error,
            Box::new(|_| Err("hook exploded".to_string())),
        );
        let counter = observed.clone();
        registry.register(
            HookKind::Error,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }),
        );
        assert_eq!(registry.dispatch(HookKind::Error, &context()), None);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_kinds_are_a_no_op() {
        let registry = HookRegistry::new();
        assert_eq!(registry.dispatch(HookKind::CacheMiss, &context()), None);
    }
}
