//! Property-based tests for merge and resolution laws

mod merge_properties;
