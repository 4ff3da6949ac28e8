//! Scenario tests that drive the library the way the binary does.
