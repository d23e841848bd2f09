//! Operator tooling for Keystone session state.

pub mod cli;
