#![forbid(unsafe_code)]

//! Loop contexts and the stack that enforces their nesting.
//!
//! While content for one slot of a repetition is being instantiated, the
//! slot's address is the *active loop context*. Anything created inside can
//! ask the stack "which repetition am I being rendered for" without the slot
//! being threaded through every call.
//!
//! # Invariants
//!
//! 1. Every loop context carries a list index.
//! 2. With an empty stack only a one-wildcard context may be pushed.
//! 3. Otherwise the pushed context has exactly one more wildcard than the
//!    active one, and its second-to-last wildcard path is the active
//!    context's path: descent is one level at a time into the declared child.
//! 4. The stack never exceeds `max_depth` entries.
//! 5. A push is undone when its [`LoopContextGuard`] drops, which covers
//!    early returns, errors, panics and dropped futures alike.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | No list index | Address built for a plain path | `CoreError::MissingListIndex` |
//! | Wrong depth or parent | Template nests loops incorrectly | `CoreError::InvalidNesting` |
//! | Runaway recursion | Self-including template | `CoreError::LoopDepthExceeded` |
//! | Guards dropped out of order | Interleaved async callers | Debug assertion; release builds pop LIFO |

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use crate::address::StateAddress;
use crate::error::{CoreError, Result};
use crate::list_index::ListIndexId;
use crate::path::{PathId, PathInfo};

/// Default maximum loop nesting depth.
pub const DEFAULT_MAX_LOOP_DEPTH: usize = 128;

struct LoopContextInner {
    address: StateAddress,
    list_index: ListIndexId,
    parent: Option<LoopContext>,
}

/// The address of one slot of one repetition, linked to its enclosing slot.
///
/// Cheap to clone (shared). Two handles are the same context only if they
/// come from the same [`LoopContext::new`] call; see [`ptr_eq`](Self::ptr_eq).
#[derive(Clone)]
pub struct LoopContext(Rc<LoopContextInner>);

impl LoopContext {
    /// Create a context for `address` under `parent`.
    pub fn new(address: StateAddress, parent: Option<LoopContext>) -> Result<Self> {
        let list_index = address.list_index().ok_or_else(|| CoreError::MissingListIndex {
            path: address.path_info().path().to_owned(),
        })?;
        Ok(Self(Rc::new(LoopContextInner {
            address,
            list_index,
            parent,
        })))
    }

    #[must_use]
    pub fn address(&self) -> &StateAddress {
        &self.0.address
    }

    #[must_use]
    pub fn path_info(&self) -> &Rc<PathInfo> {
        self.0.address.path_info()
    }

    #[must_use]
    pub fn list_index(&self) -> ListIndexId {
        self.0.list_index
    }

    #[must_use]
    pub fn parent(&self) -> Option<&LoopContext> {
        self.0.parent.as_ref()
    }

    /// Wildcard depth of this context's path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path_info().wildcard_count()
    }

    /// This context or the nearest ancestor whose path is `path`.
    #[must_use]
    pub fn find(&self, path: PathId) -> Option<&LoopContext> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if ctx.path_info().id() == path {
                return Some(ctx);
            }
            current = ctx.parent();
        }
        None
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopContext")
            .field("path", &self.path_info().path())
            .field("list_index", &self.0.list_index)
            .finish()
    }
}

struct StackInner {
    stack: RefCell<Vec<LoopContext>>,
    max_depth: usize,
}

/// Bounded stack of active loop contexts.
///
/// Clones share the same stack.
#[derive(Clone)]
pub struct LoopContextStack {
    inner: Rc<StackInner>,
}

impl Default for LoopContextStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOOP_DEPTH)
    }
}

impl LoopContextStack {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            inner: Rc::new(StackInner {
                stack: RefCell::new(Vec::new()),
                max_depth,
            }),
        }
    }

    /// The active (innermost) context.
    #[must_use]
    pub fn current(&self) -> Option<LoopContext> {
        self.inner.stack.borrow().last().cloned()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.stack.borrow().len()
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.inner.max_depth
    }

    fn validate(&self, ctx: &LoopContext) -> Result<()> {
        let stack = self.inner.stack.borrow();
        if stack.len() >= self.inner.max_depth {
            return Err(CoreError::LoopDepthExceeded {
                max_depth: self.inner.max_depth,
            });
        }
        let info = ctx.path_info();
        let count = info.wildcard_count();
        match stack.last() {
            None if count == 1 => Ok(()),
            None => Err(CoreError::InvalidNesting {
                path: info.path().to_owned(),
                expected_parent: None,
            }),
            Some(current) => {
                let parent_ok = count == current.depth() + 1
                    && info.wildcard_path_ids().get(count.wrapping_sub(2))
                        == Some(&current.path_info().id());
                if parent_ok {
                    Ok(())
                } else {
                    Err(CoreError::InvalidNesting {
                        path: info.path().to_owned(),
                        expected_parent: Some(current.path_info().path().to_owned()),
                    })
                }
            }
        }
    }

    /// Validate and push `ctx`; the returned guard pops it.
    pub fn enter(&self, ctx: LoopContext) -> Result<LoopContextGuard> {
        self.validate(&ctx)?;
        #[cfg(feature = "tracing")]
        tracing::trace!(
            path = ctx.path_info().path(),
            depth = self.depth() + 1,
            "enter loop context"
        );
        self.inner.stack.borrow_mut().push(ctx.clone());
        Ok(LoopContextGuard {
            inner: Rc::clone(&self.inner),
            ctx,
        })
    }

    /// Re-establish the chain ending at `ctx` on top of the current stack.
    ///
    /// Contexts already on top of the stack are skipped; the rest are pushed
    /// outermost first, each validated. Used when a nested repetition is
    /// reconciled outside the pass that created its enclosing slot.
    pub fn enter_chain(&self, ctx: &LoopContext) -> Result<LoopChainGuard> {
        let current = self.current();
        let mut pending = Vec::new();
        let mut cursor = Some(ctx);
        while let Some(c) = cursor {
            if current.as_ref().is_some_and(|cur| cur.ptr_eq(c)) {
                break;
            }
            pending.push(c.clone());
            cursor = c.parent();
        }
        let mut chain = LoopChainGuard {
            guards: Vec::with_capacity(pending.len()),
        };
        for c in pending.into_iter().rev() {
            chain.guards.push(self.enter(c)?);
        }
        Ok(chain)
    }

    /// Push a context for `address`, run `f`, pop.
    ///
    /// The new context's parent is the active context. The pop happens even
    /// if `f` panics.
    pub fn create_loop_context<R>(
        &self,
        address: StateAddress,
        f: impl FnOnce(&LoopContext) -> R,
    ) -> Result<R> {
        let ctx = LoopContext::new(address, self.current())?;
        let _guard = self.enter(ctx.clone())?;
        Ok(f(&ctx))
    }

    /// Async form of [`create_loop_context`](Self::create_loop_context).
    ///
    /// The context stays pushed while the returned future is suspended and is
    /// popped when it completes or is dropped.
    pub async fn create_loop_context_async<F, Fut, R>(
        &self,
        address: StateAddress,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(LoopContext) -> Fut,
        Fut: Future<Output = R>,
    {
        let ctx = LoopContext::new(address, self.current())?;
        let _guard = self.enter(ctx.clone())?;
        Ok(f(ctx).await)
    }
}

impl fmt::Debug for LoopContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopContextStack")
            .field("depth", &self.depth())
            .field("max_depth", &self.inner.max_depth)
            .finish()
    }
}

/// RAII guard for one pushed loop context.
#[must_use = "dropping this guard pops the loop context"]
pub struct LoopContextGuard {
    inner: Rc<StackInner>,
    ctx: LoopContext,
}

impl LoopContextGuard {
    #[must_use]
    pub fn context(&self) -> &LoopContext {
        &self.ctx
    }
}

impl Drop for LoopContextGuard {
    fn drop(&mut self) {
        let popped = self.inner.stack.borrow_mut().pop();
        if let Some(popped) = popped {
            debug_assert!(popped.ptr_eq(&self.ctx), "loop context guards dropped out of order");
        }
    }
}

impl fmt::Debug for LoopContextGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopContextGuard")
            .field("context", &self.ctx)
            .finish()
    }
}

/// Guards for a chain pushed by [`LoopContextStack::enter_chain`].
///
/// Pops innermost first.
#[must_use = "dropping this guard pops the loop context chain"]
#[derive(Debug)]
pub struct LoopChainGuard {
    guards: Vec<LoopContextGuard>,
}

impl LoopChainGuard {
    /// Number of contexts this guard pushed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Drop for LoopChainGuard {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
