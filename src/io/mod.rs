//! I/O utilities for file handling
//!
//! This module provides readers for the serialized formats the tools consume.

pub mod pickle;
