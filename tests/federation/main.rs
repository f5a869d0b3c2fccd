//! Federation Integration Tests
//!
//! Whole-cohort behaviour through the public facade: single-winner writes,
//! error precedence, copy merging, cross-member paging and classification
//! recovery.

#[path = "../common/mod.rs"]
mod common;

mod paging;
mod precedence;
mod scenarios;
