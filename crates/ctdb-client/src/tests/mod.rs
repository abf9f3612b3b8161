//! Socket-level tests against a scripted daemon.

mod lifecycle_behaviour;
mod support;
