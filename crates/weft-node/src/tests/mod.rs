//! Tests for the weft-node crate.

mod helpers;

mod access;
