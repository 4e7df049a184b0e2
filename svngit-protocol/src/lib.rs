//! SvnGit Protocol Library
//!
//! Implementation of the svn:// (ra_svn) wire protocol on top of
//! svngit-core:
//! - Item codec (numbers, words, counted strings, lists)
//! - svndiff0 delta decoding and full-text encoding
//! - Sans-io session state machine (handshake, auth, command dispatch)
//! - Read, lock, update-report and commit-editor command sets

pub mod commands;
pub mod editcmds;
pub mod items;
pub mod report;
pub mod session;
pub mod svndiff;
pub mod wire;

pub use items::{encode, parse_item, write_item, Item};
pub use report::ReportState;
pub use session::{Session, SessionConfig, SessionContext, SessionOutput, CAPABILITIES};
pub use wire::{error_code, failure, success, svn_date};
