//! Cross-module tests for the cache engine
