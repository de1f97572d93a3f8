//! Consolidated test modules.
//!
//! This module contains end-to-end reconciliation tests that are
//! parameterized across tracking store backends.
