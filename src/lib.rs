//! `ansibug`: a Debug Adapter Protocol bridge for an Ansible-like playbook
//! engine (§1). See [`cli`] for the three subcommands; the modules below are
//! the tightly-coupled subsystems described in §4.

pub mod adapter;
pub mod cli;
pub mod dap;
pub mod debuggee;
pub mod error;
pub mod log;
pub mod pathmap;
pub mod socket;
pub mod transport;
