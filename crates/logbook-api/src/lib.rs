//! HTTP surface for the approval workflow.

pub mod server;
