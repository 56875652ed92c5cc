//! Client-side consistency core for a collaborative whiteboard.
//!
//! This crate keeps a local, authoritative copy of a board's objects in step
//! with a shared remote document store. Local edits apply to the store at
//! once and are sent in debounced, coalesced batches that survive network
//! failures; remote snapshots are folded in incrementally, with echoes of
//! this client's own writes recognised and skipped, and concurrent edits to
//! the same object settled by last-write-wins. A grid spatial index answers
//! the renderer's viewport queries without scanning every object.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`model`] | Board objects, kind-specific geometry, sparse patches |
//! | [`geometry`] | Axis-aligned bounds and per-kind bounding boxes |
//! | [`spatial`] | Grid-bucketed spatial index with drag exemption |
//! | [`store`] | Object store with relationship indices |
//! | [`reconcile`] | Copy-on-write snapshot reconciliation |
//! | [`conflict`] | Last-write-wins conflict resolution |
//! | [`write_queue`] | Debounced, batched, retrying write queue (no I/O) |
//! | [`viewport`] | Ordered visible-id query for rendering |
//! | [`session`] | [`session::BoardSession`], the owner of store and queue |
//! | [`worker`] | Async actor running a session against a backend |
//! | [`persistence`] | Persistence boundary trait and in-memory backend |
//! | [`clock`] | Injectable time source |
//! | [`config`] | Environment-driven tuning |
//! | [`consts`] | Shared numeric defaults |

pub mod clock;
pub mod config;
pub mod conflict;
pub mod consts;
pub mod geometry;
pub mod model;
pub mod persistence;
pub mod reconcile;
pub mod session;
pub mod spatial;
pub mod store;
pub mod viewport;
pub mod worker;
pub mod write_queue;
