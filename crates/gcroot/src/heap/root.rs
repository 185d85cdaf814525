//! Root Records - GC Root Identification
//!
//! Roots are the locations the collector treats as intrinsically alive.
//! Every search starts from (or reports) one of these.
//!
//! # Root Kinds
//!
//! 1. **Statics** - static and thread-static fields
//! 2. **Stack** - local variables, tied to the frame that owns them
//! 3. **Handles** - strong, weak, pinned, async-pinned, ref-counted,
//!    dependent and sized-ref handle table entries
//! 4. **Finalizer queue** - objects waiting for finalization
//!
//! The kind does not change what the search does; it is carried through so
//! callers can explain *why* a root exists.

use super::{Address, ObjectHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stack frame owning a local-variable root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub instruction_pointer: u64,
    pub stack_pointer: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Arc<str>>,
}

impl StackFrame {
    pub fn new(instruction_pointer: u64, stack_pointer: u64) -> Self {
        Self {
            instruction_pointer,
            stack_pointer,
            method: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<Arc<str>>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// Thread owning a root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadRef {
    pub managed_id: u32,
    pub os_id: u32,
}

/// App domain owning a root
///
/// Ids are allocated by the heap view that reports the domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppDomainRef {
    pub id: u32,
    pub name: Arc<str>,
}

/// Root kinds for categorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    /// Static field
    StaticVar,
    /// Thread-static field
    ThreadStaticVar,
    /// Thread-stack variable; the frame is absent when the stack was not
    /// walked precisely
    LocalVar {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<StackFrame>,
    },
    /// Pinned handle or pinned static
    Pinning,
    /// Strong handle
    Strong,
    /// Weak (short or long) handle
    Weak,
    /// Pinned handle owned by an overlapped I/O operation
    AsyncPinned,
    /// Ref-counted handle (COM wrappers)
    RefCounted,
    /// Dependent handle primary
    Dependent,
    /// Sized-ref handle
    SizedRef,
    /// Finalizer queue entry
    FinalizerQueue,
}

impl RootKind {
    /// Local variable without frame information
    pub fn local() -> Self {
        RootKind::LocalVar { frame: None }
    }

    /// Local variable owned by `frame`
    pub fn local_in(frame: StackFrame) -> Self {
        RootKind::LocalVar { frame: Some(frame) }
    }

    pub fn is_stack(&self) -> bool {
        matches!(self, RootKind::LocalVar { .. })
    }

    pub fn is_static(&self) -> bool {
        matches!(self, RootKind::StaticVar | RootKind::ThreadStaticVar)
    }

    /// Handle-table categories
    pub fn is_handle(&self) -> bool {
        matches!(
            self,
            RootKind::Pinning
                | RootKind::Strong
                | RootKind::Weak
                | RootKind::AsyncPinned
                | RootKind::RefCounted
                | RootKind::Dependent
                | RootKind::SizedRef
        )
    }

    /// Kinds that also stop the collector from moving the object
    pub fn implies_pinning(&self) -> bool {
        matches!(self, RootKind::Pinning | RootKind::AsyncPinned)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RootKind::StaticVar => "StaticVar",
            RootKind::ThreadStaticVar => "ThreadStaticVar",
            RootKind::LocalVar { .. } => "LocalVar",
            RootKind::Pinning => "Pinning",
            RootKind::Strong => "Strong",
            RootKind::Weak => "Weak",
            RootKind::AsyncPinned => "AsyncPinned",
            RootKind::RefCounted => "RefCounted",
            RootKind::Dependent => "Dependent",
            RootKind::SizedRef => "SizedRef",
            RootKind::FinalizerQueue => "FinalizerQueue",
        }
    }
}

impl fmt::Display for RootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Root record - describes a single root reference
///
/// - `address` is the root slot (static field, stack slot, handle entry)
/// - `object` is what the slot points at; for interior roots the view has
///   already resolved it to the containing object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootRecord {
    pub address: Address,
    pub object: ObjectHandle,
    pub kind: RootKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_domain: Option<AppDomainRef>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub interior: bool,
}

impl RootRecord {
    /// Create new root record
    ///
    /// Pinning kinds set `pinned`.
    pub fn new(address: Address, object: ObjectHandle, kind: RootKind, name: impl Into<String>) -> Self {
        let pinned = kind.implies_pinning();
        Self {
            address,
            object,
            kind,
            thread: None,
            app_domain: None,
            name: name.into(),
            pinned,
            interior: false,
        }
    }

    pub fn with_thread(mut self, thread: ThreadRef) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn with_app_domain(mut self, domain: AppDomainRef) -> Self {
        self.app_domain = Some(domain);
        self
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn with_interior(mut self, interior: bool) -> Self {
        self.interior = interior;
        self
    }

    /// Address of the object this root keeps alive
    #[inline]
    pub fn object_address(&self) -> Address {
        self.object.address
    }

    /// Owning frame of a local-variable root
    pub fn frame(&self) -> Option<&StackFrame> {
        match &self.kind {
            RootKind::LocalVar { frame } => frame.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for RootRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#x} -> {}", self.kind, self.address, self.object)?;
        if !self.name.is_empty() {
            write!(f, " ({})", self.name)?;
        }
        if self.pinned {
            f.write_str(" [pinned]")?;
        }
        Ok(())
    }
}
