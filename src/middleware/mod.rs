//! Middleware chains.
//!
//! Three disjoint kinds run at different points of a client's life:
//! client-setup middleware once at build time, request middleware before
//! every send, response middleware after every receive. Within a chain,
//! entries run in ascending priority; equal priorities keep registration
//! order. Registering the same `Arc` again only moves it.

pub mod request;
pub mod response;

use std::fmt;
use std::sync::Arc;

use crate::client::ClientConfig;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// Mutates the configuration before the client is built.
pub type ClientMiddleware = dyn Fn(&mut ClientConfig) + Send + Sync;

/// Runs before each send; an error aborts the call before any I/O.
pub type RequestMiddleware = dyn Fn(&mut Request) -> Result<()> + Send + Sync;

/// Runs after each receive; an error fails the call.
pub type ResponseMiddleware = dyn Fn(&mut Response) -> Result<()> + Send + Sync;

/// Priority of the middlewares the client installs itself. They run before
/// anything registered with a higher priority.
pub const BUILTIN_PRIORITY: i32 = i32::MIN;

struct Entry<F: ?Sized> {
    priority: i32,
    seq: u64,
    f: Arc<F>,
}

/// Priority-ordered list of middleware.
pub struct Chain<F: ?Sized> {
    entries: Vec<Entry<F>>,
    next_seq: u64,
}

impl<F: ?Sized> Chain<F> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    /// Add `f`, or update its priority if this exact `Arc` is already present.
    pub fn register(&mut self, priority: i32, f: Arc<F>) {
        match self.entries.iter_mut().find(|e| Arc::ptr_eq(&e.f, &f)) {
            Some(existing) => existing.priority = priority,
            None => {
                self.entries.push(Entry {
                    priority,
                    seq: self.next_seq,
                    f,
                });
                self.next_seq += 1;
            }
        }
        self.entries.sort_by_key(|e| (e.priority, e.seq));
    }

    pub fn remove(&mut self, f: &Arc<F>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !Arc::ptr_eq(&e.f, f));
        self.entries.len() != before
    }

    /// Entries in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<F>> {
        self.entries.iter().map(|e| &e.f)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F: ?Sized> Default for Chain<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> Clone for Chain<F> {
    fn clone(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|e| Entry {
                    priority: e.priority,
                    seq: e.seq,
                    f: e.f.clone(),
                })
                .collect(),
            next_seq: self.next_seq,
        }
    }
}

impl<F: ?Sized> fmt::Debug for Chain<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.priority))
            .finish()
    }
}

impl Chain<ClientMiddleware> {
    /// Run every setup middleware over `config`.
    pub fn apply(&self, config: &mut ClientConfig) {
        for f in self.iter() {
            f(config);
        }
    }
}

impl Chain<RequestMiddleware> {
    /// Run in order, stopping at the first error.
    pub fn apply(&self, req: &mut Request) -> Result<()> {
        self.iter().try_for_each(|f| f(req))
    }
}

impl Chain<ResponseMiddleware> {
    /// Run in order, stopping at the first error.
    pub fn apply(&self, resp: &mut Response) -> Result<()> {
        self.iter().try_for_each(|f| f(resp))
    }
}
