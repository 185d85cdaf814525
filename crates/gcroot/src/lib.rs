//! # gcroot - GC Root Finder for Managed Heaps
//!
//! gcroot answers "why is this object still alive?" for a .NET heap taken
//! from a live process or a crash dump. Given a target object it finds the
//! GC roots (statics, stack locals, handle-table entries) that keep it
//! reachable, and it searches for paths between arbitrary objects.
//!
//! ## Overview
//!
//! - **Address Sets**: Segment-indexed atomic bitmaps; memory follows the
//!   populated parts of the heap, not its address range
//! - **Reachability Cache**: One back-pointer per reachable object, built by a
//!   parallel trace; any cached object walks back to a root in O(path length)
//! - **Root Search**: Per-root breadth-first walks that share proven endpoints
//!   and dead objects across one query
//! - **Cooperative Cancellation**: Checked once per visited object
//! - **Corrupt-Dump Tolerance**: Unresolvable referents become leaves; cycles
//!   are cut by visited sets
//!
//! ## Quick Start
//!
//! ```rust
//! use gcroot::heap::{HeapSnapshotBuilder, RootKind, ThreadRef};
//! use gcroot::{CancellationToken, RootSearch};
//!
//! fn main() -> gcroot::Result<()> {
//!     let heap = HeapSnapshotBuilder::new()
//!         .segment(0x1000, 0x2000)
//!         .object(0x1000, "App.Cache", &[0x1040])
//!         .object(0x1040, "App.Session", &[])
//!         .pinned_static_root("App.s_cache", 0x1000)
//!         .local_root(ThreadRef { managed_id: 1, os_id: 4242 }, RootKind::local(), "session", 0x1040)
//!         .build_shared()?;
//!
//!     let mut search = RootSearch::new(heap);
//!     let token = CancellationToken::none();
//!     search.build_cache(&token)?;
//!
//!     for root_path in search.enumerate_gc_roots(0x1040, false, &token)? {
//!         let root_path = root_path?;
//!         println!("{} keeps it alive via {}", root_path.root.kind, root_path.path);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            Dump reader / live-process reader             │
//! │        (implements HeapGraphView, not part of gcroot)    │
//! └────────────────────────────┬────────────────────────────┘
//!                              │ roots, references, types
//! ┌────────────────────────────┼────────────────────────────┐
//! │                     RootSearch                           │
//! │                            ▼                             │
//! │  ┌─────────────────────┐      ┌──────────────────────┐  │
//! │  │ ReachabilityCache   │◄─────│ build_cache          │  │
//! │  │ - reached AddressSet│      │ - gcroot-cache-N     │  │
//! │  │ - back-pointer arena│      │   work stealing      │  │
//! │  └──────────┬──────────┘      └──────────────────────┘  │
//! │             │ seeds known endpoints                      │
//! │             ▼                                            │
//! │  ┌───────────────────────────────────────────┐          │
//! │  │ Queries                                    │          │
//! │  │ - enumerate_gc_roots (per-root BFS)        │          │
//! │  │ - find_single_path   (BFS)                 │          │
//! │  │ - enumerate_all_paths (lazy DFS)           │          │
//! │  └───────────────────────────────────────────┘          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! - `HeapGraphView` implementations must be `Send + Sync`
//! - `AddressSet` is safe for concurrent `try_add`; exactly one caller wins
//! - `build_cache` and `clear_cache` take `&mut self`; queries take `&self`
//!   and may run concurrently
//!
//! ## Modules
//!
//! - [`cache`]: Reachability cache and its parallel builder
//! - [`cancel`]: Cooperative cancellation tokens
//! - [`config`]: Search configuration and validation
//! - [`error`]: Error types for all gcroot operations
//! - [`heap`]: The heap graph boundary and the in-memory snapshot
//! - [`logging`]: Structured search events
//! - [`object_set`]: Segment-indexed address sets
//! - [`search`]: Root and path queries
//! - [`stats`]: Search counters and timers

// Core
pub mod config;
pub mod error;
pub mod cancel;

// Heap boundary and traversal state
pub mod heap;
pub mod object_set;
pub mod cache;

// Queries
pub mod search;

// Monitoring
pub mod logging;
pub mod stats;

// Re-export main types for convenience
pub use cache::ReachabilityCache;
pub use cancel::CancellationToken;
pub use config::{ConfigError, SearchConfig};
pub use error::{GcRootError, Result};
pub use heap::{
    Address, HeapGraphView, HeapSegment, ObjectHandle, ObjectReference, ObjectType, RootKind,
    RootRecord, StackwalkPolicy, NULL_ADDRESS,
};
pub use object_set::{AddressSet, ObjectSet};
pub use search::{AllPaths, GCRoot, ObjectPath, RootPath, RootPaths, RootSearch};
pub use stats::SearchSummary;

/// gcroot version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
