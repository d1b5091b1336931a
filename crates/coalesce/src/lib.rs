//! # Request coalescing for expensive lookups
//!
//! When many callers concurrently ask for the same key of a slow or expensive
//! upstream, running the upstream call once per caller wastes work and can
//! overload the upstream. This crate deduplicates those calls: for any given
//! key, at most one fetch is in flight at a time, and every caller that asks
//! for that key while the fetch is running receives the single shared outcome.
//! Successful results additionally stay in an in-memory cache, so later
//! lookups are served without touching the upstream at all.
//!
//! ## How a lookup proceeds
//!
//! A lookup via [`Coalescer::get`] goes through the following steps:
//! - First, the result cache is consulted. A hit returns immediately.
//! - On miss, the in-flight table decides whether a fetch for this key is
//!   already running. If so, the caller joins that episode and waits for its
//!   outcome.
//! - Otherwise this caller starts a new episode: the fetch is spawned as a
//!   detached task, and the caller waits on it like everybody else.
//!
//! The decision between "join" and "start" happens atomically under one lock
//! together with the cache lookup, so two callers can never both start a fetch
//! for the same key. The lock only ever guards map operations. The fetch
//! itself always runs outside of it, which means fetches for distinct keys
//! proceed fully in parallel.
//!
//! ## Episodes and outcomes
//!
//! The lifetime of one in-flight fetch for one key is called an *episode*.
//! Every caller attached to an episode observes the identical outcome:
//! the fetched value on success, or the fetch's error on failure. Errors are
//! never cached. Once a failed episode is torn down, the next lookup for that
//! key starts a fresh attempt against the upstream.
//!
//! Because the fetch runs as a detached task, a caller that gives up waiting
//! (for example through a timeout) detaches without disturbing the fetch or
//! the other waiters. The fetch runs to completion and still populates the
//! cache for future callers.
//!
//! ## What this crate does not do
//!
//! The result cache is a bare map: entries live for the lifetime of the
//! process unless removed through [`Coalescer::evict`] or
//! [`Coalescer::clear`]. There is no TTL, no size bound, no persistence, and
//! no coalescing across processes. Retry and backoff policy belongs to the
//! fetch implementation, not to this crate.

#![warn(missing_docs)]

mod coalescer;
mod config;
mod defer;

pub use coalescer::*;
pub use config::*;
