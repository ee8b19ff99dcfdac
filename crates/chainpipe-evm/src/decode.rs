//! Minimal ABI word decoding for event logs.
//!
//! Indexed parameters live in `topics[1..]`, every other parameter is one
//! 32-byte word of `data` (all handled events carry static types only).

use alloy_primitives::{Address, U256};
use chainpipe_core::error::PipelineError;
use chainpipe_core::types::LogEvent;
use thiserror::Error;

const WORD: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogDecodeError {
    #[error("expected {expected} topics, got {got}")]
    TopicCount { expected: usize, got: usize },

    #[error("data too short: need {need} bytes, got {got}")]
    ShortData { need: usize, got: usize },
}

impl From<LogDecodeError> for PipelineError {
    fn from(e: LogDecodeError) -> Self {
        PipelineError::Decode(e.to_string())
    }
}

/// Fail unless the log has exactly `expected` topics (signature included).
pub fn expect_topics(log: &LogEvent, expected: usize) -> Result<(), LogDecodeError> {
    if log.topics.len() != expected {
        return Err(LogDecodeError::TopicCount {
            expected,
            got: log.topics.len(),
        });
    }
    Ok(())
}

/// Fail unless the log carries at least `words` data words.
pub fn expect_words(log: &LogEvent, words: usize) -> Result<(), LogDecodeError> {
    let need = words * WORD;
    if log.data.len() < need {
        return Err(LogDecodeError::ShortData {
            need,
            got: log.data.len(),
        });
    }
    Ok(())
}

/// Indexed `address` parameter; the address is the low 20 bytes.
pub fn topic_address(log: &LogEvent, index: usize) -> Result<Address, LogDecodeError> {
    let topic = log.topics.get(index).ok_or(LogDecodeError::TopicCount {
        expected: index + 1,
        got: log.topics.len(),
    })?;
    Ok(Address::from_word(*topic))
}

/// Indexed `uint256` parameter.
pub fn topic_uint(log: &LogEvent, index: usize) -> Result<U256, LogDecodeError> {
    let topic = log.topics.get(index).ok_or(LogDecodeError::TopicCount {
        expected: index + 1,
        got: log.topics.len(),
    })?;
    Ok(U256::from_be_bytes(topic.0))
}

/// Non-indexed `uint256` parameter at word position `index`.
pub fn data_uint(log: &LogEvent, index: usize) -> Result<U256, LogDecodeError> {
    let start = index * WORD;
    let word = log.data.get(start..start + WORD).ok_or(LogDecodeError::ShortData {
        need: start + WORD,
        got: log.data.len(),
    })?;
    Ok(U256::from_be_slice(word))
}
