//! Property-based tests

mod frame_proptest;
