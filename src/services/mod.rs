//! Service layer for the crawler.
//!
//! This module contains the business logic for:
//! - Talking to the Gerrit REST API (`GerritClient`)
//! - Enriching changes with file diffs (`ChangeAssembler`)

mod assembler;
mod gerrit;

pub use assembler::ChangeAssembler;
pub use gerrit::{ChangeQuery, GerritApi, GerritClient};
