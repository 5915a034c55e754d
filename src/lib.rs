#![allow(missing_docs)] // TODO: enforce once the API surface settles

//! LiteClaw backend: a loopback HTTP service where every side-effectful
//! capability is gated behind a plan, a single-use approval token, and
//! runtime policy checks.
//!
//! The flow: the router turns a prompt into a [`types::Plan`]; the client
//! inspects it via an action card and requests an approval token; the
//! executor consumes the token and drives the plan's steps through the
//! file/shell agents, re-checking scope at every touch and persisting an
//! event-stamped trace.

pub mod agents;
pub mod config;
pub mod doctor;
pub mod http;
pub mod kernel;
pub mod logging;
pub mod logstore;
pub mod models;
pub mod types;
