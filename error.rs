/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::io;

/// Errors surfaced by the storage engine core.
///
/// CRC failures on page read and free-page scan errors during initialization
/// are handled locally (an empty replacement page, or simply skipping the
/// page) and never reach this type; everything else propagates.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("value out of range: {message}")]
    OutOfRange { message: String },

    #[error("operation attempted on a disposed resource: {message}")]
    Disposed { message: String },

    #[error("io error: {0}")]
    IoError(#[from] io::Error),

    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("operation canceled")]
    Canceled,

    #[error("arithmetic overflow: {message}")]
    Overflow { message: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        StorageError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn out_of_range(message: impl Into<String>) -> Self {
        StorageError::OutOfRange {
            message: message.into(),
        }
    }

    pub(crate) fn disposed(message: impl Into<String>) -> Self {
        StorageError::Disposed {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        StorageError::InvalidOperation {
            message: message.into(),
        }
    }
}
