// Copyright (c) 2025 Junior Sundar
//
// SPDX-License-Identifier: BSD-3-Clause

//! A field-aware, partially-observable extension of RRT* (FARRT*) for 2D polygonal
//! workspaces.
//!
//! The `base` module carries the generic planning scaffolding (state spaces, goals,
//! the `Planner` trait, the error taxonomy); everything else implements the
//! domain-specific pieces needed to plan under partial observability: a `World` that
//! answers vision-disc observation queries, a `TreeStore` that survives subtree
//! severance, an inconsistency priority `queue` for RRTx-style rewiring, a potential
//! `field` that nudges sampling away from freshly observed obstacles, and the
//! `partially_observable` driver that ties them together.

pub mod base;
pub mod field;
pub mod geometry;
pub mod partially_observable;
pub mod queue;
pub mod rrtstar;
pub mod severance;
pub mod time;
pub mod tree;
pub mod world;

pub use partially_observable::{PartiallyObservablePlanner, PlannerConfig};
