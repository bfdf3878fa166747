//! Zarf admission agent
//!
//! A mutating admission webhook that rewrites image, OCI and git references
//! in Pods, Flux sources and Argo CD Applications so they resolve against the
//! air-gap mirror recorded in the cluster's Zarf state.

#![deny(missing_docs)]

pub mod config;
pub mod context;
pub mod guard;
pub mod hooks;
pub mod patch;
pub mod server;
pub mod state;
pub mod webhook;
