//! Interceptor chain: priority-ordered request/response hooks with context
//! threading and cancellation propagation.
//!
//! No object hierarchy: interceptors are function-typed values carrying a
//! priority and a registration index, grounded
//! on the teacher's `events::EventHandler`/`FnEventHandler` closure pattern
//! generalized from "observe" to "observe and transform".

use crate::error::{CoreError, ErrorContext, ErrorKind, Result};
use crate::request::{CancelHandle, HttpRequest, HttpResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The value threaded through the chain: the request, an optional response
/// (present only once the transport has executed the call), free-form
/// metadata, and the shared cancellation handle.
#[derive(Debug, Clone)]
pub struct Context {
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
    pub metadata: HashMap<String, Value>,
    pub cancel: Option<CancelHandle>,
}

impl Context {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: None,
            metadata: HashMap::new(),
            cancel: None,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

pub type InterceptorFn =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<Context>> + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Validation,
    Execution,
    ContextThreading,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Validation => "validation",
            Phase::Execution => "execution",
            Phase::ContextThreading => "context-threading",
        }
    }
}

struct Entry {
    f: InterceptorFn,
    priority: i32,
    index: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Request,
    Response,
}

/// Ordered request/response hook chain. Entries are immutable after `add`;
/// execution never locks beyond the snapshot read.
pub struct InterceptorChain {
    request: Mutex<Vec<Entry>>,
    response: Mutex<Vec<Entry>>,
    next_index: AtomicUsize,
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self {
            request: Mutex::new(Vec::new()),
            response: Mutex::new(Vec::new()),
            next_index: AtomicUsize::new(0),
        }
    }

    pub fn add_request<F, Fut>(&self, priority: i32, f: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context>> + Send + 'static,
    {
        self.push(Kind::Request, priority, wrap(f));
    }

    pub fn add_response<F, Fut>(&self, priority: i32, f: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context>> + Send + 'static,
    {
        self.push(Kind::Response, priority, wrap(f));
    }

    fn push(&self, kind: Kind, priority: i32, f: InterceptorFn) {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let entry = Entry { f, priority, index };
        let list = match kind {
            Kind::Request => &self.request,
            Kind::Response => &self.response,
        };
        list.lock().unwrap().push(entry);
    }

    pub fn clear(&self) {
        self.request.lock().unwrap().clear();
        self.response.lock().unwrap().clear();
    }

    pub fn counts(&self) -> (usize, usize) {
        (
            self.request.lock().unwrap().len(),
            self.response.lock().unwrap().len(),
        )
    }

    /// Request interceptors run in descending priority; ties broken by
    /// registration order.
    pub async fn execute_request(&self, ctx: Context) -> Result<Context> {
        let mut with_priority: Vec<(InterceptorFn, i32, usize)> = {
            let guard = self.request.lock().unwrap();
            guard.iter().map(|e| (e.f.clone(), e.priority, e.index)).collect()
        };
        with_priority.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        run_chain(ctx, with_priority, "request").await
    }

    /// Response interceptors run in ascending priority; ties broken by
    /// *reverse* registration order, so paired interceptors wrap correctly
    /// (outermost request = outermost response).
    pub async fn execute_response(&self, ctx: Context) -> Result<Context> {
        if ctx.response.is_none() {
            return Err(CoreError::new(
                ErrorKind::Transport,
                "response interceptor chain requires a response in context",
            )
            .with_context(ErrorContext {
                interceptor_phase: Some(Phase::Validation.as_str()),
                ..Default::default()
            }));
        }

        let mut with_priority: Vec<(InterceptorFn, i32, usize)> = {
            let guard = self.response.lock().unwrap();
            guard.iter().map(|e| (e.f.clone(), e.priority, e.index)).collect()
        };
        with_priority.sort_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)));

        run_chain(ctx, with_priority, "response").await
    }
}

async fn run_chain(
    mut ctx: Context,
    ordered: Vec<(InterceptorFn, i32, usize)>,
    interceptor_type: &'static str,
) -> Result<Context> {
    for (f, _priority, index) in ordered {
        if ctx.is_cancelled() {
            return Err(cancelled_error(interceptor_type, index, Phase::Execution));
        }

        let before = ctx.clone();
        let result = f(before).await;

        let next = match result {
            Ok(next_ctx) => next_ctx,
            Err(mut err) => {
                err.context.interceptor_type.get_or_insert(interceptor_type);
                err.context.interceptor_index.get_or_insert(index);
                err.context
                    .interceptor_phase
                    .get_or_insert(Phase::Execution.as_str());
                return Err(err);
            }
        };

        if next.is_cancelled() {
            return Err(cancelled_error(interceptor_type, index, Phase::Execution));
        }

        if interceptor_type == "response" && next.response.is_none() {
            return Err(CoreError::new(
                ErrorKind::Transport,
                "response interceptor dropped the response from its context",
            )
            .with_context(ErrorContext {
                interceptor_type: Some(interceptor_type),
                interceptor_index: Some(index),
                interceptor_phase: Some(Phase::ContextThreading.as_str()),
                ..Default::default()
            }));
        }

        ctx = next.clone();
    }
    Ok(ctx)
}

fn cancelled_error(interceptor_type: &'static str, index: usize, phase: Phase) -> CoreError {
    CoreError::new(ErrorKind::Timeout, "cancelled during interceptor execution").with_context(
        ErrorContext {
            aborted: true,
            interceptor_type: Some(interceptor_type),
            interceptor_index: Some(index),
            interceptor_phase: Some(phase.as_str()),
            ..Default::default()
        },
    )
}

fn wrap<F, Fut>(f: F) -> InterceptorFn
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Context>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}
